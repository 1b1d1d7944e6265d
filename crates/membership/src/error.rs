//! Membership errors.

use storage::StorageError;
use streaming::StreamingError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MembershipError>;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Streaming(#[from] StreamingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("already joined as {0}")]
    AlreadyJoined(String),

    #[error("not joined to a group")]
    NotJoined,

    #[error("introducer {address} unreachable: {source}")]
    IntroducerUnreachable {
        address: String,
        #[source]
        source: StreamingError,
    },

    #[error("join via {member} failed: {source}")]
    JoinFailed {
        member: String,
        #[source]
        source: StreamingError,
    },
}
