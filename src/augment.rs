use std::f32::consts::PI;

use burn::config::Config;
use ndarray::Array2;
use rand::Rng;

/// Random preprocessing applied to training samples.
///
/// Every factor is a symmetric range around the identity: the rotation is a
/// fraction of a full turn, the translations are fractions of the image
/// height and width, and zoom and contrast are relative scale factors. A
/// factor of zero disables its transform.
#[derive(Config, Debug)]
pub struct AugmentationConfig {
    #[config(default = 0.05)]
    pub rotation: f64,

    #[config(default = 0.05)]
    pub height_translation: f64,

    #[config(default = 0.05)]
    pub width_translation: f64,

    #[config(default = 0.05)]
    pub zoom: f64,

    #[config(default = 0.05)]
    pub contrast: f64,
}

impl AugmentationConfig {
    pub fn init(&self) -> Augmentation {
        let factors = [
            ("rotation", self.rotation),
            ("height translation", self.height_translation),
            ("width translation", self.width_translation),
            ("zoom", self.zoom),
            ("contrast", self.contrast),
        ];
        for (name, factor) in factors {
            if !(factor.is_finite() && factor >= 0.0) {
                panic!("Augmentation {name} factor should be non-negative, got {factor}");
            }
        }
        // scale factors must stay positive
        if self.zoom >= 1.0 || self.contrast >= 1.0 {
            panic!(
                "Zoom and contrast factors should be below 1, got {} and {}",
                self.zoom, self.contrast
            );
        }

        Augmentation {
            rotation: self.rotation as f32,
            translation: [self.height_translation as f32, self.width_translation as f32],
            zoom: self.zoom as f32,
            contrast: self.contrast as f32,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Augmentation {
    rotation: f32,
    translation: [f32; 2],
    zoom: f32,
    contrast: f32,
}

impl Augmentation {
    pub fn apply<R: Rng + ?Sized>(&self, image: &Array2<f32>, rng: &mut R) -> Array2<f32> {
        let (height, width) = image.dim();
        self.sample(height, width, rng).apply(image)
    }

    /// Draws the parameters of one random transform for an image of the given size.
    pub fn sample<R: Rng + ?Sized>(&self, height: usize, width: usize, rng: &mut R) -> Transform {
        Transform {
            angle: symmetric(rng, self.rotation) * 2.0 * PI,
            shift: [
                symmetric(rng, self.translation[0]) * height as f32,
                symmetric(rng, self.translation[1]) * width as f32,
            ],
            scale: 1.0 + symmetric(rng, self.zoom),
            contrast: 1.0 + symmetric(rng, self.contrast),
        }
    }
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, factor: f32) -> f32 {
    if factor == 0.0 {
        0.0
    } else {
        rng.gen_range(-factor..=factor)
    }
}

/// One concrete draw of the augmentation.
///
/// Rotation, translation and zoom are folded into a single inverse affine
/// map around the image center, so each output pixel is interpolated once.
#[derive(Clone, Debug, PartialEq)]
pub struct Transform {
    /// Radians, counter-clockwise.
    pub angle: f32,
    /// Pixels, `[rows, columns]`.
    pub shift: [f32; 2],
    /// Sampling scale; values above one zoom out.
    pub scale: f32,
    pub contrast: f32,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            angle: 0.0,
            shift: [0.0, 0.0],
            scale: 1.0,
            contrast: 1.0,
        }
    }

    fn is_rigid_identity(&self) -> bool {
        self.angle == 0.0 && self.shift == [0.0, 0.0] && self.scale == 1.0
    }

    pub fn apply(&self, image: &Array2<f32>) -> Array2<f32> {
        let warped = if self.is_rigid_identity() {
            image.clone()
        } else {
            self.warp(image)
        };

        if self.contrast == 1.0 {
            warped
        } else {
            adjust_contrast(warped, self.contrast)
        }
    }

    fn warp(&self, image: &Array2<f32>) -> Array2<f32> {
        let (height, width) = image.dim();
        let center_y = (height as f32 - 1.0) / 2.0;
        let center_x = (width as f32 - 1.0) / 2.0;
        let (sin, cos) = self.angle.sin_cos();

        Array2::from_shape_fn((height, width), |(y, x)| {
            let offset_y = (y as f32 - center_y) * self.scale - self.shift[0];
            let offset_x = (x as f32 - center_x) * self.scale - self.shift[1];

            let source_y = center_y - sin * offset_x + cos * offset_y;
            let source_x = center_x + cos * offset_x + sin * offset_y;

            bilinear(image, source_y, source_x)
        })
    }
}

fn adjust_contrast(image: Array2<f32>, factor: f32) -> Array2<f32> {
    let mean = image.mean().unwrap_or(0.0);
    image.mapv_into(|value| ((value - mean) * factor + mean).clamp(0.0, 1.0))
}

fn bilinear(image: &Array2<f32>, y: f32, x: f32) -> f32 {
    let (height, width) = image.dim();

    let (y0, x0) = (y.floor(), x.floor());
    let (fy, fx) = (y - y0, x - x0);
    let (y0, x0) = (y0 as isize, x0 as isize);

    let at = |y: isize, x: isize| image[[reflect(y, height), reflect(x, width)]];

    let top = at(y0, x0) * (1.0 - fx) + at(y0, x0 + 1) * fx;
    let bottom = at(y0 + 1, x0) * (1.0 - fx) + at(y0 + 1, x0 + 1) * fx;

    top * (1.0 - fy) + bottom * fy
}

/// Maps an out-of-range index back into `0..size` by mirroring about the
/// edges, repeating the edge pixel (`d c b a | a b c d | d c b a`).
pub fn reflect(index: isize, size: usize) -> usize {
    let size = size as isize;
    let period = 2 * size;
    let index = index.rem_euclid(period);

    if index < size {
        index as usize
    } else {
        (period - 1 - index) as usize
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn gradient() -> Array2<f32> {
        Array2::from_shape_fn((28, 28), |(y, x)| (y * 28 + x) as f32 / (28.0 * 28.0))
    }

    #[test]
    fn reflect_mirrors_about_edges() {
        assert_eq!(reflect(0, 4), 0);
        assert_eq!(reflect(3, 4), 3);
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(8, 4), 0);
    }

    #[test]
    fn zero_factors_leave_image_unchanged() {
        let augmentation = AugmentationConfig::new()
            .with_rotation(0.0)
            .with_height_translation(0.0)
            .with_width_translation(0.0)
            .with_zoom(0.0)
            .with_contrast(0.0)
            .init();
        let image = gradient();
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(augmentation.apply(&image, &mut rng), image);
    }

    #[test]
    fn shift_moves_pixels() {
        let mut image = Array2::zeros((28, 28));
        image[[10, 10]] = 1.0;

        let transform = Transform {
            shift: [2.0, 1.0],
            ..Transform::identity()
        };
        let shifted = transform.apply(&image);

        assert_eq!(shifted[[12, 11]], 1.0);
        assert_eq!(shifted.sum(), 1.0);
    }

    #[test]
    fn half_turn_flips_both_axes() {
        let image = gradient();
        let transform = Transform {
            angle: PI,
            ..Transform::identity()
        };
        let rotated = transform.apply(&image);

        for ((y, x), value) in rotated.indexed_iter() {
            assert!((value - image[[27 - y, 27 - x]]).abs() < 1e-4);
        }
    }

    #[test]
    fn contrast_stays_in_unit_range() {
        let mut image = Array2::zeros((28, 28));
        image.slice_mut(ndarray::s![.., ..14]).fill(1.0);

        let transform = Transform {
            contrast: 1.5,
            ..Transform::identity()
        };
        let adjusted = transform.apply(&image);

        assert!(adjusted.iter().all(|value| (0.0..=1.0).contains(value)));
        assert_eq!(adjusted[[0, 0]], 1.0);
        assert_eq!(adjusted[[0, 27]], 0.0);
    }

    #[test]
    fn random_draws_respect_factors() {
        let augmentation = AugmentationConfig::new().init();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..256 {
            let transform = augmentation.sample(28, 28, &mut rng);
            assert!(transform.angle.abs() <= 0.05 * 2.0 * PI + 1e-6);
            assert!(transform.shift[0].abs() <= 0.05 * 28.0 + 1e-6);
            assert!(transform.shift[1].abs() <= 0.05 * 28.0 + 1e-6);
            assert!((transform.scale - 1.0).abs() <= 0.05 + 1e-6);
            assert!((transform.contrast - 1.0).abs() <= 0.05 + 1e-6);
        }
    }

    #[test]
    fn augmented_values_stay_in_unit_range() {
        let augmentation = AugmentationConfig::new().init();
        let image = gradient();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..32 {
            let augmented = augmentation.apply(&image, &mut rng);
            assert!(augmented.iter().all(|value| (0.0..=1.0).contains(value)));
        }
    }

    #[test]
    #[should_panic = "non-negative"]
    fn negative_factor_is_rejected() {
        AugmentationConfig::new().with_rotation(-0.1).init();
    }

    #[test]
    #[should_panic = "below 1"]
    fn zoom_of_one_is_rejected() {
        AugmentationConfig::new().with_zoom(1.0).init();
    }
}
