use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use image::{
    imageops::{self, FilterType},
    DynamicImage, ImageBuffer, Luma,
};
use ndarray::Array2;

use crate::{
    data::{HEIGHT, WIDTH},
    error,
    model::{Model, ModelRecord},
    training::TrainingConfig,
    LABELS,
};

/// Intensity above which a pixel belongs to the glyph.
const THRESHOLD: f32 = 0.1;

/// Longest side of a rescaled glyph inside the 28x28 frame.
const GLYPH_SIZE: f32 = 20.0;

/// Turns a free-form drawing into a model input: crops the bounding box of
/// the lit pixels, scales its longest side to 20 pixels and centers it in a
/// black 28x28 frame. Colors are averaged to one intensity in `[0, 1]`.
///
/// Returns `None` when no pixel is above the threshold.
pub fn preprocess(image: &DynamicImage) -> Option<Array2<f32>> {
    let rgb = image.to_rgb32f();

    let mut bounds: Option<[u32; 4]> = None;
    for (x, y, pixel) in rgb.enumerate_pixels() {
        if pixel.0.iter().any(|&value| value > THRESHOLD) {
            let [top, bottom, left, right] = bounds.get_or_insert([y, y, x, x]);
            *top = (*top).min(y);
            *bottom = (*bottom).max(y);
            *left = (*left).min(x);
            *right = (*right).max(x);
        }
    }
    let [top, bottom, left, right] = bounds?;

    let height = bottom - top + 1;
    let width = right - left + 1;
    let glyph = ImageBuffer::<Luma<f32>, Vec<f32>>::from_fn(width, height, |x, y| {
        let [r, g, b] = rgb.get_pixel(left + x, top + y).0;
        Luma([(r + g + b) / 3.0])
    });

    let scale = GLYPH_SIZE / height.max(width) as f32;
    let scaled_height = ((height as f32 * scale).round() as u32).max(1);
    let scaled_width = ((width as f32 * scale).round() as u32).max(1);
    let glyph = imageops::resize(&glyph, scaled_width, scaled_height, FilterType::Triangle);

    let offset_y = (HEIGHT - scaled_height as usize) / 2;
    let offset_x = (WIDTH - scaled_width as usize) / 2;

    let mut frame = Array2::zeros((HEIGHT, WIDTH));
    for (x, y, pixel) in glyph.enumerate_pixels() {
        frame[[offset_y + y as usize, offset_x + x as usize]] = pixel.0[0];
    }

    Some(frame)
}

/// A trained model ready to classify single drawings.
pub struct Predictor<B: Backend> {
    model: Model<B>,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: Model<B>, device: B::Device) -> Self {
        Self { model, device }
    }

    /// Restores the configuration and weights a training run left in
    /// `artifact_dir`.
    pub fn load(artifact_dir: &Path, device: B::Device) -> error::Result<Self> {
        let config = TrainingConfig::load(artifact_dir.join("config.json"))?;
        let record: ModelRecord<B> =
            CompactRecorder::new().load(artifact_dir.join("model"), &device)?;

        let model = config.model.init::<B>(&device).load_record(record);

        Ok(Self::new(model, device))
    }

    /// The most likely letter, or `None` for a blank drawing.
    pub fn predict(&self, image: &DynamicImage) -> Option<char> {
        let frame = preprocess(image)?;
        let class = self.classify(&frame);

        LABELS.get(class).copied()
    }

    fn classify(&self, frame: &Array2<f32>) -> usize {
        let values = frame.iter().copied().collect::<Vec<_>>();
        let data = TensorData::new(values, [1, 1, HEIGHT, WIDTH]);
        let input = Tensor::<B, 4>::from_data(data.convert::<B::FloatElem>(), &self.device);

        self.model
            .forward(input)
            .argmax(1)
            .into_scalar()
            .elem::<i64>() as usize
    }
}
