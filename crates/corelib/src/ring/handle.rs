//! Shared handles to a node's membership ring.
//!
//! Every read and write of the ring goes through one `parking_lot::Mutex`,
//! held only for the duration of a single ring operation. The closure-based
//! API makes it impossible to keep the guard alive across an `.await`.
//!
//! Two capabilities exist over the same ring:
//!
//! - `MemberList`: full access, held by the membership protocol
//! - `RingReader`: queries only, handed to the coordinator, the file store and
//!   the file client so membership changes flow in one direction

use parking_lot::Mutex;
use std::sync::Arc;

use super::ring::{MembershipRing, RingSnapshot};
use crate::node::MemberIdentity;

/// Mutable, shared handle to the local membership ring.
#[derive(Clone, Debug)]
pub struct MemberList {
    inner: Arc<Mutex<MembershipRing>>,
}

impl MemberList {
    pub fn new(ring: MembershipRing) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ring)),
        }
    }

    /// Query-only view over the same ring.
    pub fn reader(&self) -> RingReader {
        RingReader {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Run several ring operations atomically.
    pub fn update<R>(&self, f: impl FnOnce(&mut MembershipRing) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn add(&self, member: MemberIdentity) -> bool {
        self.inner.lock().add(member)
    }

    pub fn remove(&self, member: &MemberIdentity) -> bool {
        self.inner.lock().remove(member)
    }

    pub fn set_coordinator(&self, member: &MemberIdentity) -> bool {
        self.inner.lock().set_coordinator(member)
    }

    pub fn owner(&self) -> MemberIdentity {
        self.inner.lock().owner().clone()
    }

    pub fn coordinator(&self) -> Option<MemberIdentity> {
        self.inner.lock().coordinator().cloned()
    }

    pub fn contains(&self, member: &MemberIdentity) -> bool {
        self.inner.lock().contains(member)
    }

    pub fn members(&self) -> Vec<MemberIdentity> {
        self.inner.lock().members()
    }

    pub fn successors(&self, n: usize) -> Vec<MemberIdentity> {
        self.inner.lock().successors(n)
    }

    pub fn successor(&self) -> Option<MemberIdentity> {
        self.inner.lock().successor()
    }

    pub fn snapshot(&self) -> RingSnapshot {
        self.inner.lock().snapshot()
    }
}

/// Read-only view of a node's membership ring.
///
/// Cloning is cheap; all clones observe the same ring.
#[derive(Clone, Debug)]
pub struct RingReader {
    inner: Arc<Mutex<MembershipRing>>,
}

impl RingReader {
    pub fn owner(&self) -> MemberIdentity {
        self.inner.lock().owner().clone()
    }

    pub fn coordinator(&self) -> Option<MemberIdentity> {
        self.inner.lock().coordinator().cloned()
    }

    pub fn contains(&self, member: &MemberIdentity) -> bool {
        self.inner.lock().contains(member)
    }

    pub fn members(&self) -> Vec<MemberIdentity> {
        self.inner.lock().members()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn successors(&self, n: usize) -> Vec<MemberIdentity> {
        self.inner.lock().successors(n)
    }

    pub fn predecessor(&self) -> Option<MemberIdentity> {
        self.inner.lock().predecessor()
    }

    pub fn snapshot(&self) -> RingSnapshot {
        self.inner.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_observes_mutations() {
        let owner = MemberIdentity::new("a", 1, 1);
        let list = MemberList::new(MembershipRing::new(owner.clone()));
        let reader = list.reader();

        let peer = MemberIdentity::new("b", 1, 1);
        assert!(list.add(peer.clone()));
        assert!(reader.contains(&peer));
        assert_eq!(reader.successors(1), vec![peer.clone()]);

        assert!(list.remove(&peer));
        assert!(!reader.contains(&peer));
        assert_eq!(reader.owner(), owner);
    }

    #[test]
    fn test_update_is_atomic_compound_operation() {
        let owner = MemberIdentity::new("a", 1, 1);
        let list = MemberList::new(MembershipRing::new(owner.clone()));

        let became = list.update(|ring| {
            if ring.coordinator().is_none() && !ring.has_successor() {
                ring.set_coordinator(&owner)
            } else {
                false
            }
        });

        assert!(became);
        assert_eq!(list.coordinator(), Some(owner));
    }
}
