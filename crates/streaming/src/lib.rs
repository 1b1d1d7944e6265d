//! Wire protocol and transport for inter-member traffic.
//!
//! This crate provides the protocol and codecs for:
//! - Membership messages (join/leave/crash dissemination, election tokens)
//! - File messages routed to the coordinator or a file server
//! - Failure-detector datagrams
//! - Raw file byte streams that follow an `Ok` acknowledgment

pub mod codec;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod sender;

pub use error::{Result, StreamingError};
pub use protocol::{
    Datagram, Destination, FileMessage, FileMessageKind, IntroducerReply, IntroducerRequest,
    MembershipMessage, Message, VersionMap,
};
pub use sender::{Transport, TransportConfig};
