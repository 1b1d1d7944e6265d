//! Core library for the ring cluster.
//!
//! This crate provides the data model every other crate builds on:
//! - Member identities and their ring ordering
//! - The membership ring (successors, predecessor, coordinator)
//! - The shared ring handle and its read-only view
//! - Versioned file naming

pub mod error;
pub mod naming;
pub mod node;
pub mod ring;

pub use error::{Error, Result};
pub use node::MemberIdentity;
pub use ring::{MemberList, MembershipRing, RingReader, RingSnapshot};
