//! A cluster member and the command surface it offers.
//!
//! `Member` outlives any single group membership: `join` creates a session
//! with a fresh identity, `leave` (or a crash report naming us) ends it. File
//! commands need a live session.

use corelib::naming::decode_remote;
use corelib::{MemberIdentity, RingSnapshot};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::PutReceipt;
use streaming::VersionMap;

use crate::config::MemberConfig;
use crate::error::{MembershipError, Result};
use crate::session::Session;

/// Membership as seen by one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberListing {
    pub owner: MemberIdentity,
    pub snapshot: RingSnapshot,
}

impl fmt::Display for MemberListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24}{:<8}{:<16}{}", "Host", "Port", "Joined (ms)", "")?;
        write!(f, "{}", "-".repeat(56))?;
        for member in &self.snapshot.members {
            let mut tags = Vec::new();
            if *member == self.owner {
                tags.push("self");
            }
            if self.snapshot.coordinator.as_ref() == Some(member) {
                tags.push("coordinator");
            }
            write!(
                f,
                "\n{:<24}{:<8}{:<16}{}",
                member.host,
                member.port,
                member.joined_at,
                tags.join(", ")
            )?;
        }
        Ok(())
    }
}

pub struct Member {
    config: MemberConfig,
    session: Mutex<Option<Arc<Session>>>,
}

impl Member {
    pub fn new(config: MemberConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MemberConfig {
        &self.config
    }

    pub fn is_joined(&self) -> bool {
        self.session().is_ok()
    }

    /// Join the group named by the configured introducer (or found one).
    pub async fn join(&self) -> Result<MemberIdentity> {
        let evicted = {
            let mut slot = self.session.lock();
            match slot.as_ref() {
                Some(session) if session.is_active() => {
                    return Err(MembershipError::AlreadyJoined(session.identity().to_string()));
                }
                _ => slot.take(),
            }
        };
        if let Some(evicted) = evicted {
            evicted.stop(false).await;
        }

        let session = Session::start(self.config.clone()).await?;
        let identity = session.identity().clone();
        *self.session.lock() = Some(session);
        Ok(identity)
    }

    /// Announce departure and stop every loop.
    pub async fn leave(&self) -> Result<()> {
        let session = self.session()?;
        session.stop(true).await;
        self.session.lock().take();
        Ok(())
    }

    pub fn list_members(&self) -> Result<MemberListing> {
        let session = self.session()?;
        Ok(MemberListing {
            owner: session.identity().clone(),
            snapshot: session.ring().snapshot(),
        })
    }

    pub fn list_self(&self) -> Result<MemberIdentity> {
        Ok(self.session()?.identity().clone())
    }

    pub fn coordinator(&self) -> Result<Option<MemberIdentity>> {
        Ok(self.session()?.ring().coordinator())
    }

    pub async fn put(&self, local: &Path, remote: &str) -> Result<PutReceipt> {
        let session = self.session()?;
        Ok(session.client().put(local, remote).await?)
    }

    /// Returns the member that served the file.
    pub async fn get(&self, remote: &str, local: &Path) -> Result<MemberIdentity> {
        let session = self.session()?;
        Ok(session.client().get(remote, local).await?)
    }

    pub async fn delete(&self, remote: &str) -> Result<()> {
        let session = self.session()?;
        Ok(session.client().delete(remote).await?)
    }

    pub async fn list_versions(&self, remote: &str) -> Result<VersionMap> {
        let session = self.session()?;
        Ok(session.client().list_versions(remote).await?)
    }

    pub async fn get_versions(
        &self,
        remote: &str,
        count: usize,
        local: &Path,
    ) -> Result<Vec<(u64, PathBuf)>> {
        let session = self.session()?;
        Ok(session.client().get_versions(remote, count, local).await?)
    }

    /// Files stored on this member, with remote names decoded.
    pub fn list_local_files(&self) -> Result<Vec<String>> {
        let session = self.session()?;
        Ok(session
            .store()
            .local_files()
            .iter()
            .map(|name| decode_remote(name))
            .collect())
    }

    /// The live session. A session stopped by a crash report counts as not
    /// joined.
    fn session(&self) -> Result<Arc<Session>> {
        match self.session.lock().as_ref() {
            Some(session) if session.is_active() => Ok(Arc::clone(session)),
            _ => Err(MembershipError::NotJoined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_need_a_session() {
        let member = Member::new(MemberConfig::default());
        assert!(!member.is_joined());
        assert!(matches!(member.list_self(), Err(MembershipError::NotJoined)));
        assert!(matches!(member.list_members(), Err(MembershipError::NotJoined)));
        assert!(matches!(member.list_local_files(), Err(MembershipError::NotJoined)));
    }

    #[test]
    fn test_listing_marks_self_and_coordinator() {
        let me = MemberIdentity::new("127.0.0.1", 7000, 5);
        let other = MemberIdentity::new("127.0.0.1", 7001, 6);
        let listing = MemberListing {
            owner: me.clone(),
            snapshot: RingSnapshot {
                members: vec![me, other.clone()],
                coordinator: Some(other),
            },
        };

        let rendered = listing.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].ends_with("self"));
        assert!(lines[3].ends_with("coordinator"));
    }
}
