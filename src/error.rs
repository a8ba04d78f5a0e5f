use burn::{config::ConfigError, record::RecorderError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("row {row}: expected 785 fields (label + 784 pixels), found {found}")]
    RowLength { row: usize, found: usize },

    #[error("row {row}, column {column}: invalid value {value:?}")]
    Field {
        row: usize,
        column: usize,
        value: String,
    },

    #[error("label {0} is not a letter class")]
    Label(u8),

    #[error("{0} split is empty")]
    EmptySplit(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
