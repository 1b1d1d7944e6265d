//! Ordered membership ring.
//!
//! Holds the set of live member identities in ring order, the identity of the
//! local node (`owner`) and the currently known coordinator.
//!
//! # Invariants
//!
//! - The owner is always a member while the ring exists
//! - The coordinator, when set, is a member
//! - Members are unique and totally ordered by `MemberIdentity`'s `Ord`
//!
//! This type does no locking of its own; see `MemberList` for the shared,
//! serialized handle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Bound::{Excluded, Unbounded};

use crate::node::MemberIdentity;

/// Serializable copy of a ring's membership, exchanged during join.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSnapshot {
    /// Members in ring order.
    pub members: Vec<MemberIdentity>,
    /// Coordinator known to the node that produced the snapshot.
    pub coordinator: Option<MemberIdentity>,
}

/// Ordered set of members seen from one node.
#[derive(Clone, Debug)]
pub struct MembershipRing {
    members: BTreeSet<MemberIdentity>,
    owner: MemberIdentity,
    coordinator: Option<MemberIdentity>,
}

impl MembershipRing {
    /// Create a ring containing only `owner` (first member of a group).
    pub fn new(owner: MemberIdentity) -> Self {
        let mut members = BTreeSet::new();
        members.insert(owner.clone());
        Self {
            members,
            owner,
            coordinator: None,
        }
    }

    /// Create a ring from a snapshot received from an existing member and
    /// insert `owner` into it.
    ///
    /// The snapshot's coordinator is kept only if it is one of the snapshot's
    /// members.
    pub fn from_snapshot(owner: MemberIdentity, snapshot: RingSnapshot) -> Self {
        let mut ring = Self::new(owner);
        for member in snapshot.members {
            // Earlier incarnations of the owner's endpoint are gone.
            if member.same_endpoint(&ring.owner) && member != ring.owner {
                continue;
            }
            ring.members.insert(member);
        }
        if let Some(coordinator) = snapshot.coordinator {
            ring.set_coordinator(&coordinator);
        }
        ring
    }

    /// The local node's identity.
    pub fn owner(&self) -> &MemberIdentity {
        &self.owner
    }

    /// Add a member. Returns `true` if it was not already present.
    pub fn add(&mut self, member: MemberIdentity) -> bool {
        self.members.insert(member)
    }

    /// Remove a member. Returns `true` if it was present.
    ///
    /// Removing the coordinator clears the coordinator. The owner cannot be
    /// removed from its own ring; the node leaves by discarding the ring.
    pub fn remove(&mut self, member: &MemberIdentity) -> bool {
        if *member == self.owner {
            return false;
        }
        if self.coordinator.as_ref() == Some(member) {
            self.coordinator = None;
        }
        self.members.remove(member)
    }

    pub fn contains(&self, member: &MemberIdentity) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in ring order, owner included.
    pub fn members(&self) -> Vec<MemberIdentity> {
        self.members.iter().cloned().collect()
    }

    /// True when at least one other member exists.
    pub fn has_successor(&self) -> bool {
        self.members.len() > 1
    }

    /// Up to `n` successors of the owner, nearest first.
    ///
    /// # Algorithm
    ///
    /// 1. Start at the owner
    /// 2. Step to the next-higher identity, wrapping to the lowest
    /// 3. Stop on reaching the owner again or after `n` steps
    ///
    /// The result never contains the owner or duplicates and has exactly
    /// `min(n, len - 1)` entries.
    ///
    /// # Performance
    /// - **Time**: O(n * log m) where m = ring size
    /// - **Space**: O(n)
    pub fn successors(&self, n: usize) -> Vec<MemberIdentity> {
        let limit = n.min(self.members.len().saturating_sub(1));
        let mut successors = Vec::with_capacity(limit);
        let mut cursor = &self.owner;

        while successors.len() < limit {
            match self.next_after(cursor) {
                Some(next) if *next != self.owner => {
                    successors.push(next.clone());
                    cursor = next;
                }
                _ => break,
            }
        }

        successors
    }

    /// Nearest successor of the owner, if any.
    pub fn successor(&self) -> Option<MemberIdentity> {
        self.successors(1).into_iter().next()
    }

    /// Nearest predecessor of the owner, wrapping to the highest member.
    pub fn predecessor(&self) -> Option<MemberIdentity> {
        let predecessor = self
            .members
            .range(..&self.owner)
            .next_back()
            .or_else(|| self.members.iter().next_back())?;

        (*predecessor != self.owner).then(|| predecessor.clone())
    }

    /// Record `member` as coordinator. No-op if it is not a member.
    ///
    /// Returns `true` if the coordinator was set.
    pub fn set_coordinator(&mut self, member: &MemberIdentity) -> bool {
        if self.members.contains(member) {
            self.coordinator = Some(member.clone());
            true
        } else {
            false
        }
    }

    pub fn coordinator(&self) -> Option<&MemberIdentity> {
        self.coordinator.as_ref()
    }

    /// True when the owner is the known coordinator.
    pub fn is_coordinator(&self) -> bool {
        self.coordinator.as_ref() == Some(&self.owner)
    }

    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            members: self.members(),
            coordinator: self.coordinator.clone(),
        }
    }

    fn next_after(&self, member: &MemberIdentity) -> Option<&MemberIdentity> {
        self.members
            .range((Excluded(member), Unbounded))
            .next()
            .or_else(|| self.members.iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(port: u16) -> MemberIdentity {
        MemberIdentity::new("host", port, 1)
    }

    #[test]
    fn test_single_member_has_no_neighbours() {
        let ring = MembershipRing::new(member(1));
        assert!(ring.successors(3).is_empty());
        assert_eq!(ring.predecessor(), None);
        assert!(!ring.has_successor());
    }

    #[test]
    fn test_successors_wrap_and_skip_owner() {
        let mut ring = MembershipRing::new(member(3));
        for port in [1, 2, 4, 5] {
            ring.add(member(port));
        }

        assert_eq!(ring.successors(2), vec![member(4), member(5)]);
        assert_eq!(
            ring.successors(10),
            vec![member(4), member(5), member(1), member(2)]
        );
        assert_eq!(ring.predecessor(), Some(member(2)));
    }

    #[test]
    fn test_remove_coordinator_clears_it() {
        let mut ring = MembershipRing::new(member(1));
        ring.add(member(2));
        assert!(ring.set_coordinator(&member(2)));

        assert!(ring.remove(&member(2)));
        assert_eq!(ring.coordinator(), None);
    }

    #[test]
    fn test_set_coordinator_requires_membership() {
        let mut ring = MembershipRing::new(member(1));
        assert!(!ring.set_coordinator(&member(9)));
        assert_eq!(ring.coordinator(), None);
    }

    #[test]
    fn test_owner_cannot_be_removed() {
        let mut ring = MembershipRing::new(member(1));
        assert!(!ring.remove(&member(1)));
        assert!(ring.contains(&member(1)));
    }

    #[test]
    fn test_from_snapshot_drops_unknown_coordinator() {
        let snapshot = RingSnapshot {
            members: vec![member(1), member(2)],
            coordinator: Some(member(7)),
        };
        let ring = MembershipRing::from_snapshot(member(3), snapshot);

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.coordinator(), None);
    }

    #[test]
    fn test_from_snapshot_skips_earlier_incarnation_of_owner() {
        let earlier = MemberIdentity::new("host", 3, 1);
        let now = MemberIdentity::new("host", 3, 9);
        let snapshot = RingSnapshot {
            members: vec![member(1), earlier.clone()],
            coordinator: Some(member(1)),
        };
        let ring = MembershipRing::from_snapshot(now.clone(), snapshot);

        assert!(!ring.contains(&earlier));
        assert!(ring.contains(&now));
        assert_eq!(ring.len(), 2);
    }
}
