//! File replica metadata and the coordinator role.
//!
//! This crate provides:
//! - `FileDirectory`: the authoritative file -> version -> holders map
//! - Pluggable placement strategies deciding which members receive replicas
//! - `Coordinator`: client request handling, recovery and the repair loop
//! - `StoreNetwork`: the seam through which the coordinator talks to file stores

pub mod coordinator;
pub mod directory;
pub mod error;
pub mod network;
pub mod strategy;

pub use coordinator::{Coordinator, CoordinatorConfig, RepairReport};
pub use directory::{FileDirectory, FileRecord};
pub use error::{ReplicationError, Result};
pub use network::{StoreNetwork, TcpStoreNetwork};
pub use strategy::{PlacementStrategy, RandomPlacement};
