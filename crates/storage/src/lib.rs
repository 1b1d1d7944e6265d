//! Node-local file storage and the client half of file operations.
//!
//! - `FileStore`: one per member; serves Get/Put/Replicate/Delete and the
//!   catalog request used by coordinator recovery
//! - `FileClient`: drives put/get/delete/ls/get-versions against the current
//!   coordinator and the file stores it names

pub mod client;
pub mod error;
pub mod store;

pub use client::{FileClient, PutReceipt};
pub use error::{Result, StorageError};
pub use store::FileStore;
