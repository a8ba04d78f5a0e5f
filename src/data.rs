use std::path::Path;

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{Dataset, InMemDataset},
    },
    prelude::*,
};
use csv::ByteRecord;
use ndarray::{Array2, ArrayView2};
use rand::{rngs::StdRng, seq::SliceRandom, thread_rng, SeedableRng};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, info};

use crate::{
    augment::Augmentation,
    error::{Error, Result},
    LABELS,
};

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
const PIXEL_COUNT: usize = WIDTH * HEIGHT;

pub const TRAIN_FILE: &str = "emnist-byclass-train.csv";
pub const TEST_FILE: &str = "emnist-byclass-test.csv";

// byclass labels: 0-9 digits, 10-35 and 36-61 the two letter cases
const FIRST_LETTER: u8 = 10;
const LAST_LETTER: u8 = 35;

const CHUNK_ROWS: usize = 8192;

#[derive(Debug, Clone)]
pub struct EmnistItem {
    pub image: [[u8; WIDTH]; HEIGHT],
    pub label: u8,
}

pub struct EmnistDataset {
    pub dataset: InMemDataset<EmnistItem>,
}

impl Dataset<EmnistItem> for EmnistDataset {
    fn get(&self, index: usize) -> Option<EmnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl EmnistDataset {
    pub fn new(items: Vec<EmnistItem>) -> Self {
        Self {
            dataset: InMemDataset::new(items),
        }
    }

    /// Loads the training file and splits it into train and validation
    /// sets, stratified by class.
    pub fn train_valid(data_dir: &Path, valid_fraction: f64, seed: u64) -> Result<(Self, Self)> {
        let items = read_csv(data_dir.join(TRAIN_FILE))?;
        let (train, valid) = stratified_split(items, valid_fraction, seed)?;

        if train.is_empty() {
            return Err(Error::EmptySplit("train"));
        }
        if valid.is_empty() {
            return Err(Error::EmptySplit("validation"));
        }

        info!(train = train.len(), valid = valid.len(), "split training data");

        Ok((Self::new(train), Self::new(valid)))
    }

    pub fn test(data_dir: &Path) -> Result<Self> {
        let items = read_csv(data_dir.join(TEST_FILE))?;

        if items.is_empty() {
            return Err(Error::EmptySplit("test"));
        }

        Ok(Self::new(items))
    }
}

/// Reads a headerless EMNIST csv file, keeping letters only.
///
/// Each row holds the label followed by 784 pixel intensities. Letter labels
/// are shifted down to `0..26` and images are transposed into reading
/// orientation.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Vec<EmnistItem>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut items = Vec::new();
    let mut chunk = Vec::with_capacity(CHUNK_ROWS);
    let mut first_row = 1;

    for record in reader.byte_records() {
        chunk.push(record?);

        if chunk.len() == CHUNK_ROWS {
            items.extend(parse_chunk(first_row, &chunk)?);
            first_row += chunk.len();
            chunk.clear();
        }
    }
    let row_count = first_row - 1 + chunk.len();
    items.extend(parse_chunk(first_row, &chunk)?);

    info!(
        path = %path.display(),
        rows = row_count,
        letters = items.len(),
        "loaded csv"
    );

    Ok(items)
}

fn parse_chunk(first_row: usize, records: &[ByteRecord]) -> Result<Vec<EmnistItem>> {
    let items = records
        .par_iter()
        .enumerate()
        .map(|(offset, record)| parse_row(first_row + offset, record))
        .collect::<Result<Vec<_>>>()?;

    Ok(items.into_iter().flatten().collect())
}

fn parse_row(row: usize, record: &ByteRecord) -> Result<Option<EmnistItem>> {
    if record.len() != PIXEL_COUNT + 1 {
        return Err(Error::RowLength {
            row,
            found: record.len(),
        });
    }

    let label = parse_field(row, 0, &record[0])?;
    if !(FIRST_LETTER..=LAST_LETTER).contains(&label) {
        return Ok(None);
    }

    let pixels = record
        .iter()
        .enumerate()
        .skip(1)
        .map(|(column, field)| parse_field(row, column, field))
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(EmnistItem {
        image: fix_orientation(&pixels)?,
        label: label - FIRST_LETTER,
    }))
}

fn parse_field(row: usize, column: usize, field: &[u8]) -> Result<u8> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|field| field.trim().parse().ok())
        .ok_or_else(|| Error::Field {
            row,
            column,
            value: String::from_utf8_lossy(field).into_owned(),
        })
}

/// EMNIST stores glyphs transposed.
pub fn fix_orientation(pixels: &[u8]) -> Result<[[u8; WIDTH]; HEIGHT]> {
    let raw = ArrayView2::from_shape((HEIGHT, WIDTH), pixels)?;

    let mut image = [[0; WIDTH]; HEIGHT];
    for ((y, x), &value) in raw.t().indexed_iter() {
        image[y][x] = value;
    }

    Ok(image)
}

/// Splits `items` so every class contributes the same fraction to the
/// validation set. Deterministic for a given seed.
pub fn stratified_split(
    items: Vec<EmnistItem>,
    valid_fraction: f64,
    seed: u64,
) -> Result<(Vec<EmnistItem>, Vec<EmnistItem>)> {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut classes = vec![Vec::new(); LABELS.len()];
    for item in items {
        let label = item.label;
        classes
            .get_mut(label as usize)
            .ok_or(Error::Label(label))?
            .push(item);
    }

    let mut train = Vec::new();
    let mut valid = Vec::new();

    for (label, mut class_items) in classes.into_iter().enumerate() {
        class_items.shuffle(&mut rng);

        let valid_count = (class_items.len() as f64 * valid_fraction).round() as usize;
        let train_items = class_items.split_off(valid_count);

        debug!(
            label = %LABELS[label],
            train = train_items.len(),
            valid = class_items.len(),
            "class split"
        );

        valid.extend(class_items);
        train.extend(train_items);
    }

    train.shuffle(&mut rng);
    valid.shuffle(&mut rng);

    Ok((train, valid))
}

/// Scales pixel intensities into `[0, 1]`.
pub fn normalize(image: &[[u8; WIDTH]; HEIGHT]) -> Array2<f32> {
    Array2::from_shape_fn((HEIGHT, WIDTH), |(y, x)| image[y][x] as f32 / 255.)
}

#[derive(Clone, Debug)]
pub struct EmnistBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone)]
pub struct EmnistBatcher<B: Backend> {
    device: B::Device,
    augmentation: Option<Augmentation>,
}

impl<B: Backend> EmnistBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            augmentation: None,
        }
    }

    pub fn with_augmentation(self, augmentation: Augmentation) -> Self {
        Self {
            augmentation: Some(augmentation),
            ..self
        }
    }

    fn prepare(&self, item: &EmnistItem) -> Array2<f32> {
        let image = normalize(&item.image);

        match &self.augmentation {
            Some(augmentation) => augmentation.apply(&image, &mut thread_rng()),
            None => image,
        }
    }
}

impl<B: Backend> Batcher<EmnistItem, EmnistBatch<B>> for EmnistBatcher<B> {
    fn batch(&self, items: Vec<EmnistItem>) -> EmnistBatch<B> {
        let batch_size = items.len();

        let images = items
            .par_iter()
            .map(|item| self.prepare(item))
            .collect::<Vec<_>>()
            .into_iter()
            .flat_map(|image| image.into_iter())
            .collect::<Vec<f32>>();

        let targets = items
            .iter()
            .map(|item| item.label as i64)
            .collect::<Vec<_>>();

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images, [batch_size, 1, HEIGHT, WIDTH]).convert::<B::FloatElem>(),
            &self.device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets, [batch_size]).convert::<B::IntElem>(),
            &self.device,
        );

        EmnistBatch { images, targets }
    }
}
