//! Errors raised while talking to another member.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamingError>;

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("timed out while {0}")]
    Timeout(&'static str),
}

impl StreamingError {
    /// True for failures caused by the peer being unreachable or slow, as
    /// opposed to a malformed exchange.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, StreamingError::Io(_) | StreamingError::Timeout(_))
    }
}
