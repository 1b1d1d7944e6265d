//! Replication errors.

use streaming::{FileMessageKind, StreamingError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Streaming(#[from] StreamingError),

    #[error("file store replied {0:?}")]
    UnexpectedReply(FileMessageKind),
}
