use std::{fs, path::Path};

use burn::data::dataset::Dataset;
use image::{GrayImage, Luma};
use rand::thread_rng;
use tracing::info;

use crate::{
    augment::Augmentation,
    data::{normalize, EmnistItem, HEIGHT, WIDTH},
    error::Result,
};

const COLUMNS: usize = 16;

/// Saves the first `count` samples of `dataset` as a grid, each original
/// glyph above its augmented version.
pub fn save_preview<D: Dataset<EmnistItem>>(
    dataset: &D,
    augmentation: &Augmentation,
    count: usize,
    path: &Path,
) -> Result<()> {
    let count = count.min(dataset.len());
    if count == 0 {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let columns = COLUMNS.min(count);
    let rows = count.div_ceil(columns);
    let mut grid = GrayImage::new((columns * WIDTH) as u32, (2 * rows * HEIGHT) as u32);
    let mut rng = thread_rng();

    for (index, item) in (0..count).filter_map(|index| dataset.get(index)).enumerate() {
        let original = normalize(&item.image);
        let augmented = augmentation.apply(&original, &mut rng);

        let left = (index % columns) * WIDTH;
        let top = 2 * (index / columns) * HEIGHT;

        for (offset, image) in [(0, original), (HEIGHT, augmented)] {
            for ((y, x), value) in image.indexed_iter() {
                grid.put_pixel(
                    (left + x) as u32,
                    (top + offset + y) as u32,
                    Luma([(value * 255.).round() as u8]),
                );
            }
        }
    }

    grid.save(path)?;
    info!(path = %path.display(), count, "saved augmentation preview");

    Ok(())
}
