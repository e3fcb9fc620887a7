// THEORY:
// Every failure the exam pipeline can produce is one variant of `ExamError`.
// The variants follow the pipeline's own taxonomy: an upload can be rejected
// before anything is stored (`InvalidUpload`), the image can fail to decode or
// encode (`UnsupportedImageFormat`), it can be too large to analyze
// (`DimensionOverflow`), the disk can fail (`StorageFailure`), or a lookup can
// miss (`NotFound`). Only `InvalidUpload` is swallowed by the upload entry point;
// everything else aborts the run and reaches the caller.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExamError {
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("unsupported image format: {0}")]
    UnsupportedImageFormat(#[from] image::ImageError),

    #[error("image is {width}x{height}, which exceeds the limit of {max_pixels} pixels")]
    DimensionOverflow {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("storage failure at {}: {source}", path.display())]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("registry journal error: {0}")]
    Registry(String),

    #[error("analysis worker pool is not accepting jobs")]
    WorkerUnavailable,
}

impl ExamError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExamError::StorageFailure {
            path: path.into(),
            source,
        }
    }

    /// Errors the upload operation recovers from locally without reporting them.
    pub fn is_silent(&self) -> bool {
        matches!(self, ExamError::InvalidUpload(_))
    }
}

pub type Result<T> = std::result::Result<T, ExamError>;
