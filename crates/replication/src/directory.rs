//! The coordinator's file -> version -> holders map.
//!
//! A version with an empty holder set is pending: reserved by a Put that has
//! not reported back yet, or left behind after every holder was pruned. Pending
//! versions are invisible to Get and skipped by the repair loop.
//!
//! Each record remembers the highest number it ever handed out, so numbers are
//! never reused even after the newest version is abandoned.

use corelib::naming::parse_versioned;
use corelib::MemberIdentity;
use std::collections::{BTreeMap, BTreeSet};
use streaming::VersionMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRecord {
    versions: VersionMap,
    highest_assigned: u64,
}

impl FileRecord {
    pub fn versions(&self) -> &VersionMap {
        &self.versions
    }

    pub fn highest_assigned(&self) -> u64 {
        self.highest_assigned
    }

    /// Newest version with at least one holder.
    pub fn latest_confirmed(&self) -> Option<(u64, &BTreeSet<MemberIdentity>)> {
        self.versions
            .iter()
            .rev()
            .find(|(_, holders)| !holders.is_empty())
            .map(|(version, holders)| (*version, holders))
    }

    fn note_version(&mut self, version: u64) {
        self.highest_assigned = self.highest_assigned.max(version);
    }
}

/// One under-replicated version, as seen by the repair loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnderReplicated {
    pub file: String,
    pub version: u64,
    pub holders: BTreeSet<MemberIdentity>,
}

#[derive(Debug, Clone, Default)]
pub struct FileDirectory {
    records: BTreeMap<String, FileRecord>,
}

impl FileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from every member's catalog of stored names.
    ///
    /// Names that do not carry a version are ignored.
    pub fn rebuild<I>(catalogs: I) -> Self
    where
        I: IntoIterator<Item = (MemberIdentity, BTreeSet<String>)>,
    {
        let mut directory = Self::new();
        for (member, stored) in catalogs {
            for name in stored {
                match parse_versioned(&name) {
                    Ok((file, version)) => {
                        let record = directory.records.entry(file).or_default();
                        record.note_version(version);
                        record
                            .versions
                            .entry(version)
                            .or_default()
                            .insert(member.clone());
                    }
                    Err(_) => debug!(member = %member, name = %name, "ignoring unversioned file"),
                }
            }
        }
        directory
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, file: &str) -> Option<&FileRecord> {
        self.records.get(file)
    }

    pub fn files(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Reserve the next version of `file` as pending.
    pub fn reserve(&mut self, file: &str) -> u64 {
        let record = self.records.entry(file.to_string()).or_default();
        let version = record.highest_assigned + 1;
        record.note_version(version);
        record.versions.insert(version, BTreeSet::new());
        version
    }

    /// Replace the holders of `version`. An empty set abandons the version.
    pub fn confirm(&mut self, file: &str, version: u64, holders: BTreeSet<MemberIdentity>) {
        if holders.is_empty() {
            self.abandon(file, version);
            return;
        }
        let record = self.records.entry(file.to_string()).or_default();
        record.note_version(version);
        record.versions.insert(version, holders);
    }

    /// Drop a reserved version. Returns false if it was unknown.
    pub fn abandon(&mut self, file: &str, version: u64) -> bool {
        self.records
            .get_mut(file)
            .map(|record| record.versions.remove(&version).is_some())
            .unwrap_or(false)
    }

    pub fn remove(&mut self, file: &str) -> Option<FileRecord> {
        self.records.remove(file)
    }

    /// Latest confirmed version of `file` and its holders.
    pub fn latest(&self, file: &str) -> Option<(u64, Vec<MemberIdentity>)> {
        let record = self.records.get(file)?;
        let (version, holders) = record.latest_confirmed()?;
        Some((version, holders.iter().cloned().collect()))
    }

    pub fn versions(&self, file: &str) -> Option<VersionMap> {
        self.records.get(file).map(|record| record.versions.clone())
    }

    /// Record `member` as holding `version`. Pending versions are not
    /// resurrected this way.
    pub fn add_holder(&mut self, file: &str, version: u64, member: MemberIdentity) -> bool {
        match self
            .records
            .get_mut(file)
            .and_then(|record| record.versions.get_mut(&version))
        {
            Some(holders) if !holders.is_empty() => holders.insert(member),
            _ => false,
        }
    }

    /// Remove holders for which `is_member` is false. Returns how many
    /// (version, holder) entries were dropped.
    pub fn prune(&mut self, is_member: impl Fn(&MemberIdentity) -> bool) -> usize {
        let mut pruned = 0;
        for record in self.records.values_mut() {
            for holders in record.versions.values_mut() {
                let before = holders.len();
                holders.retain(|holder| is_member(holder));
                pruned += before - holders.len();
            }
        }
        pruned
    }

    /// Confirmed versions with fewer than `replication_factor` holders.
    pub fn under_replicated(&self, replication_factor: usize) -> Vec<UnderReplicated> {
        self.records
            .iter()
            .flat_map(|(file, record)| {
                record
                    .versions
                    .iter()
                    .filter(|(_, holders)| !holders.is_empty() && holders.len() < replication_factor)
                    .map(move |(version, holders)| UnderReplicated {
                        file: file.clone(),
                        version: *version,
                        holders: holders.clone(),
                    })
            })
            .collect()
    }
}
