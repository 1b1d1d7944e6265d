//! Replica placement abstractions.
//!
//! A placement strategy decides which live members should receive copies of a
//! file version:
//!
//! - **RandomPlacement**: a uniformly random subset of the membership

pub mod random;

pub use random::RandomPlacement;

use corelib::MemberIdentity;
use std::collections::BTreeSet;

/// Trait for replica placement strategies.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (Send + Sync) as they are shared
/// between request handlers and the repair loop.
pub trait PlacementStrategy: Send + Sync + 'static {
    /// Target number of holders per confirmed version.
    fn replication_factor(&self) -> usize;

    /// Targets for a new version.
    ///
    /// # Arguments
    /// * `members` - The current membership view
    ///
    /// # Returns
    /// Up to `replication_factor()` distinct members
    fn put_targets(&self, members: &[MemberIdentity]) -> Vec<MemberIdentity>;

    /// Additional members that would bring `holders` up to the replication
    /// factor. Never returns a current holder.
    ///
    /// # Arguments
    /// * `members` - The current membership view
    /// * `holders` - Members already holding the version
    fn repair_targets(
        &self,
        members: &[MemberIdentity],
        holders: &BTreeSet<MemberIdentity>,
    ) -> Vec<MemberIdentity>;

    /// Strategy name (for logging/debugging).
    fn name(&self) -> &'static str;
}
