//! Group membership, failure detection, coordinator election and the member
//! runtime that ties them to file storage.
//!
//! - `FailureDetector`: UDP ping/ack against ring successors
//! - `Disseminator`: best-effort broadcast of Join/Leave/Crash
//! - `Election`: ring-token election state machine
//! - `Member`: a node's lifecycle (join, leave) and its command surface
//! - `Introducer`: the rendezvous service joining members contact first

pub mod config;
pub mod detector;
pub mod disseminator;
pub mod election;
pub mod error;
pub mod introducer;
pub mod member;

mod session;

pub use config::MemberConfig;
pub use detector::{DetectorConfig, FailureDetector};
pub use disseminator::Disseminator;
pub use election::{Election, ElectionAction};
pub use error::{MembershipError, Result};
pub use introducer::Introducer;
pub use member::{Member, MemberListing};
