//! Membership ring implementation.
//!
//! `MembershipRing` is the plain ordered structure. `MemberList` wraps it in
//! the single per-node lock; `RingReader` is the query-only capability handed
//! to components that must never mutate membership.

pub mod handle;
pub mod ring;

pub use handle::{MemberList, RingReader};
pub use ring::{MembershipRing, RingSnapshot};
