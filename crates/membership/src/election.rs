//! Ring-token coordinator election.
//!
//! A Chang-Roberts style election over the membership ring. The highest
//! identity among live members wins:
//!
//! 1. A member that notices the coordinator is gone sends `ElectionId(self)` to
//!    its successor (unless an election is already in progress locally).
//! 2. A member receiving `ElectionId(candidate)` replaces the token with its
//!    own identity when it outranks the candidate or the candidate has left,
//!    and forwards it unchanged otherwise.
//! 3. A member receiving its own identity back has won: it becomes
//!    coordinator and sends `Elected(self)` around the ring.
//! 4. Each member receiving `Elected(leader)` records the leader and forwards
//!    the token until it reaches a member that already knows a coordinator.
//!
//! A token can vanish with the member holding it. Two things restart a
//! stuck election: removing any member while no coordinator is known, and
//! `STALL_LIMIT` consecutive suppressed initiations.
//!
//! `Election` holds only the in-progress flag and the stall counter. Every
//! decision is made against a `MembershipRing` borrowed under the ring lock,
//! and the resulting action is carried out by the caller after the lock is
//! released.

use corelib::{MemberIdentity, MembershipRing};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use streaming::MembershipMessage;
use tracing::{debug, info, warn};

/// What the caller must do after an election step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionAction {
    /// Nothing to send.
    Ignore,
    /// Send this token to the ring successor.
    Forward(MembershipMessage),
    /// The local member is now coordinator. `announce`, if present, is the
    /// `Elected` token to send to the successor.
    Won { announce: Option<MembershipMessage> },
}

/// Suppressed initiations after which an election in progress is presumed
/// lost and started again.
pub const STALL_LIMIT: u32 = 5;

#[derive(Debug, Default)]
pub struct Election {
    in_progress: AtomicBool,
    stalled: AtomicU32,
}

impl Election {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Forget the in-progress flag (a token could not be forwarded).
    pub fn abort(&self) {
        self.in_progress.store(false, Ordering::SeqCst);
        self.stalled.store(0, Ordering::SeqCst);
    }

    /// Start an election if the coordinator is unknown.
    pub fn initiate(&self, ring: &mut MembershipRing) -> ElectionAction {
        if ring.coordinator().is_some() {
            return ElectionAction::Ignore;
        }

        let owner = ring.owner().clone();
        if !ring.has_successor() {
            ring.set_coordinator(&owner);
            self.abort();
            info!(coordinator = %owner, "sole member, taking coordinator role");
            return ElectionAction::Won { announce: None };
        }

        if self.in_progress.swap(true, Ordering::SeqCst) {
            let stalled = self.stalled.fetch_add(1, Ordering::SeqCst) + 1;
            if stalled < STALL_LIMIT {
                return ElectionAction::Ignore;
            }
            warn!(rounds = stalled, "election token presumed lost, restarting");
        }
        self.stalled.store(0, Ordering::SeqCst);
        info!(candidate = %owner, "starting election");
        ElectionAction::Forward(MembershipMessage::ElectionId(owner))
    }

    /// A member left the ring. Without a known coordinator, any token it was
    /// holding is gone, so the election starts over from here.
    pub fn on_member_removed(&self, ring: &mut MembershipRing) -> ElectionAction {
        if ring.coordinator().is_some() {
            return ElectionAction::Ignore;
        }
        self.abort();
        self.initiate(ring)
    }

    pub fn on_election_id(
        &self,
        ring: &mut MembershipRing,
        candidate: MemberIdentity,
    ) -> ElectionAction {
        if ring.coordinator().is_some() {
            debug!(candidate = %candidate, "stale election token");
            return ElectionAction::Ignore;
        }
        self.in_progress.store(true, Ordering::SeqCst);

        let owner = ring.owner().clone();
        if candidate == owner {
            ring.set_coordinator(&owner);
            self.abort();
            info!(coordinator = %owner, "won election");
            return ElectionAction::Won {
                announce: Some(MembershipMessage::Elected(owner)),
            };
        }

        if owner > candidate || !ring.contains(&candidate) {
            ElectionAction::Forward(MembershipMessage::ElectionId(owner))
        } else {
            ElectionAction::Forward(MembershipMessage::ElectionId(candidate))
        }
    }

    pub fn on_elected(&self, ring: &mut MembershipRing, leader: MemberIdentity) -> ElectionAction {
        if ring.coordinator().is_some() {
            return ElectionAction::Ignore;
        }
        if !ring.set_coordinator(&leader) {
            debug!(leader = %leader, "elected member is no longer in the ring");
            self.abort();
            return ElectionAction::Ignore;
        }

        self.abort();
        info!(coordinator = %leader, "new coordinator");
        if ring.is_coordinator() {
            ElectionAction::Won { announce: None }
        } else {
            ElectionAction::Forward(MembershipMessage::Elected(leader))
        }
    }
}
