//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A stored file name does not carry a `_<version>` suffix.
    #[error("invalid versioned file name: {0}")]
    InvalidFileName(String),
    /// An address could not be split into host and port.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
