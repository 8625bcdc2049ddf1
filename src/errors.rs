use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the reading-order preprocessor.
///
/// Variants that describe bad caller input (`InvalidImage`, `TooManyBoxes`,
/// `BatchMismatch`, `EmptyBatch`) always fail the whole batch; no partial
/// `BatchFeature` is ever produced.
#[derive(Error, Debug)]
pub enum OrderPrepError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error(
        "Invalid image type at index {index}: {reason}. \
         Must be a decoded image, an HWC u8 array or a CHW f32 tensor"
    )]
    InvalidImage { index: usize, reason: String },

    #[error("Too many boxes for image {index}: got {count}, max is {max}")]
    TooManyBoxes {
        index: usize,
        count: usize,
        max: usize,
    },

    #[error("Batch mismatch: {images} images but {boxes} box lists")]
    BatchMismatch { images: usize, boxes: usize },

    #[error("Empty batch: at least one image is required")]
    EmptyBatch,

    #[error("Image {index} has {actual} channels, expected {expected} (RGB)")]
    ChannelCount {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, OrderPrepError>;
