//! Storage and file-client errors.

use streaming::StreamingError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Streaming(#[from] StreamingError),

    #[error("file name not allowed: {0}")]
    InvalidName(String),

    #[error("no coordinator is known; retry once the election converges")]
    NoCoordinator,

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("put of {file} failed: no target stored the file")]
    PutFailed { file: String },

    #[error("no holder could serve {0}")]
    Unavailable(String),

    #[error("coordinator replied {0}")]
    Rejected(String),
}
