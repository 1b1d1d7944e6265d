//! Random replica placement.
//!
//! Shuffles the candidate members and takes a prefix. Placement ignores ring
//! position entirely, so replicas of consecutive versions spread over the
//! whole cluster rather than clustering on the coordinator's neighbours.
//!
//! # Performance
//!
//! - **Time**: O(n) per call, n = member count (one shuffle)
//! - **Space**: O(n) for the shuffled candidate list

use rand::seq::SliceRandom;
use std::collections::BTreeSet;

use corelib::MemberIdentity;

use crate::strategy::PlacementStrategy;

/// Default number of holders per version.
pub const DEFAULT_REPLICATION_FACTOR: usize = 4;

/// Uniformly random placement of up to `replication_factor` replicas.
///
/// # Example
///
/// ```rust
/// use corelib::MemberIdentity;
/// use replication::{PlacementStrategy, RandomPlacement};
///
/// let strategy = RandomPlacement::new(2);
/// let members: Vec<_> = (1..=5).map(|p| MemberIdentity::new("h", p, 1)).collect();
///
/// assert_eq!(strategy.put_targets(&members).len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct RandomPlacement {
    replication_factor: usize,
}

impl RandomPlacement {
    pub fn new(replication_factor: usize) -> Self {
        Self { replication_factor }
    }
}

impl Default for RandomPlacement {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICATION_FACTOR)
    }
}

impl PlacementStrategy for RandomPlacement {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn put_targets(&self, members: &[MemberIdentity]) -> Vec<MemberIdentity> {
        let mut candidates = members.to_vec();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(self.replication_factor);
        candidates
    }

    fn repair_targets(
        &self,
        members: &[MemberIdentity],
        holders: &BTreeSet<MemberIdentity>,
    ) -> Vec<MemberIdentity> {
        let missing = self.replication_factor.saturating_sub(holders.len());
        if missing == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<MemberIdentity> = members
            .iter()
            .filter(|member| !holders.contains(member))
            .cloned()
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(missing);
        candidates
    }

    fn name(&self) -> &'static str {
        "RandomPlacement"
    }
}
