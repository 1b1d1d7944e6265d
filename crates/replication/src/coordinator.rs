//! The coordinator role.
//!
//! Exactly one member runs a `Coordinator` at a time. It is created when the
//! member wins an election and dropped when the role is lost; its
//! `FileDirectory` is never handed over. A new coordinator rebuilds the
//! directory from every member's catalog before serving requests.
//!
//! # Locking
//!
//! The directory sits behind a `parking_lot::Mutex` that is never held across
//! an `.await`. Membership is only read through a `RingReader`.

use corelib::naming::versioned_name;
use corelib::{MemberIdentity, RingReader};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use streaming::{FileMessage, FileMessageKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::FileDirectory;
use crate::network::StoreNetwork;
use crate::strategy::PlacementStrategy;

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Interval between repair passes.
    pub repair_period: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            repair_period: Duration::from_secs(10),
        }
    }
}

/// What one repair pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// (version, holder) entries dropped because the holder left the ring.
    pub pruned: usize,
    /// Replicate orders issued.
    pub ordered: usize,
    /// Holders added by this pass.
    pub added: usize,
}

pub struct Coordinator {
    ring: RingReader,
    directory: Mutex<FileDirectory>,
    network: Arc<dyn StoreNetwork>,
    placement: Arc<dyn PlacementStrategy>,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Take over the coordinator role: recover the directory from every
    /// current member, then return the ready coordinator.
    pub async fn start(
        ring: RingReader,
        network: Arc<dyn StoreNetwork>,
        placement: Arc<dyn PlacementStrategy>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        let directory = recover(&ring, &network).await;
        info!(
            files = directory.len(),
            strategy = placement.name(),
            "coordinator ready"
        );

        Arc::new(Self {
            ring,
            directory: Mutex::new(directory),
            network,
            placement,
            config,
        })
    }

    /// Serve one client request. Returns the reply to send back, if the
    /// request expects one.
    pub async fn handle(&self, request: FileMessage) -> Option<FileMessage> {
        let file = request.file.as_str();
        debug!(kind = ?request.kind, file, "coordinator request");

        match request.kind {
            FileMessageKind::Get => Some(self.get(file)),
            FileMessageKind::Put => Some(self.put(file)),
            FileMessageKind::PutOk => {
                if let Some(version) = request.version {
                    let holders: BTreeSet<_> = request.nodes.into_iter().collect();
                    info!(file, version, holders = holders.len(), "put confirmed");
                    self.directory.lock().confirm(file, version, holders);
                }
                None
            }
            FileMessageKind::PutFail => {
                if let Some(version) = request.version {
                    warn!(file, version, "put failed, releasing version");
                    self.directory.lock().abandon(file, version);
                }
                None
            }
            FileMessageKind::Delete => Some(self.delete(file)),
            FileMessageKind::GetVersions => Some(
                match self.directory.lock().versions(file) {
                    Some(versions) => FileMessage::ok().with_file(file).with_versions(versions),
                    None => FileMessage::fail(),
                },
            ),
            other => {
                warn!(kind = ?other, "unexpected message for coordinator");
                Some(FileMessage::fail())
            }
        }
    }

    fn get(&self, file: &str) -> FileMessage {
        match self.directory.lock().latest(file) {
            Some((version, holders)) => FileMessage::ok()
                .with_file(versioned_name(file, version))
                .with_nodes(holders)
                .with_version(version),
            None => FileMessage::fail(),
        }
    }

    fn put(&self, file: &str) -> FileMessage {
        let targets = self.placement.put_targets(&self.ring.members());
        if targets.is_empty() {
            return FileMessage::fail();
        }

        let version = self.directory.lock().reserve(file);
        info!(file, version, targets = targets.len(), "put planned");
        FileMessage::ok()
            .with_file(file)
            .with_nodes(targets)
            .with_version(version)
    }

    fn delete(&self, file: &str) -> FileMessage {
        let Some(record) = self.directory.lock().remove(file) else {
            return FileMessage::fail();
        };

        for (version, holders) in record.versions().clone() {
            for holder in holders {
                let network = Arc::clone(&self.network);
                let file = file.to_string();
                tokio::spawn(async move {
                    if let Err(e) = network.delete_version(&holder, &file, version).await {
                        warn!(holder = %holder, file = %file, version, "delete order failed: {}", e);
                    }
                });
            }
        }
        info!(file, "file deleted");
        FileMessage::ok()
    }

    /// Snapshot of the directory, for inspection.
    pub fn directory(&self) -> FileDirectory {
        self.directory.lock().clone()
    }

    /// One repair pass: prune holders that left the ring, then order
    /// replication of every under-replicated version.
    pub async fn repair_once(&self) -> RepairReport {
        let members = self.ring.members();
        let live: BTreeSet<MemberIdentity> = members.iter().cloned().collect();

        let (pruned, under) = {
            let mut directory = self.directory.lock();
            let pruned = directory.prune(|holder| live.contains(holder));
            (
                pruned,
                directory.under_replicated(self.placement.replication_factor()),
            )
        };
        if pruned > 0 {
            metrics::counter!("replication.holders_pruned").increment(pruned as u64);
            info!(pruned, "pruned departed holders");
        }

        let mut report = RepairReport {
            pruned,
            ..RepairReport::default()
        };

        let mut orders = JoinSet::new();
        for entry in under {
            let stored_name = versioned_name(&entry.file, entry.version);
            let holders: Vec<_> = entry.holders.iter().cloned().collect();

            for target in self.placement.repair_targets(&members, &entry.holders) {
                report.ordered += 1;
                let network = Arc::clone(&self.network);
                let stored_name = stored_name.clone();
                let holders = holders.clone();
                let file = entry.file.clone();
                let version = entry.version;
                orders.spawn(async move {
                    let outcome = network.replicate(&target, &stored_name, holders).await;
                    (file, version, target, outcome)
                });
            }
        }

        while let Some(joined) = orders.join_next().await {
            let Ok((file, version, target, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(FileMessageKind::Ok) => {
                    if self.directory.lock().add_holder(&file, version, target.clone()) {
                        report.added += 1;
                        metrics::counter!("replication.replicas_created").increment(1);
                        info!(file = %file, version, holder = %target, "replica created");
                    }
                }
                Ok(FileMessageKind::FileExists) => {
                    // The target already had a copy we did not know about.
                    if self.directory.lock().add_holder(&file, version, target.clone()) {
                        report.added += 1;
                        warn!(file = %file, version, holder = %target, "unrecorded replica reconciled");
                    }
                }
                Ok(other) => debug!(file = %file, version, target = %target, reply = ?other, "replicate refused"),
                Err(e) => warn!(file = %file, version, target = %target, "replicate failed: {}", e),
            }
        }

        report
    }

    /// Run repair passes every `repair_period` until `shutdown` fires.
    pub async fn run_repair(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.repair_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if shutdown.is_cancelled() {
                break;
            }
            let report = self.repair_once().await;
            debug!(?report, "repair pass");
        }
        info!("repair loop stopped");
    }
}

async fn recover(ring: &RingReader, network: &Arc<dyn StoreNetwork>) -> FileDirectory {
    let mut queries = JoinSet::new();
    for member in ring.members() {
        let network = Arc::clone(network);
        queries.spawn(async move {
            let catalog = network.catalog(&member).await;
            (member, catalog)
        });
    }

    let mut catalogs = Vec::new();
    while let Some(joined) = queries.join_next().await {
        let Ok((member, catalog)) = joined else {
            continue;
        };
        match catalog {
            Ok(files) => catalogs.push((member, files)),
            Err(e) => warn!(member = %member, "catalog unavailable during recovery: {}", e),
        }
    }
    FileDirectory::rebuild(catalogs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::strategy::RandomPlacement;
    use async_trait::async_trait;
    use corelib::{MemberList, MembershipRing};
    use std::collections::HashMap;
    use streaming::Destination;

    #[derive(Default)]
    struct NullNetwork;

    #[async_trait]
    impl StoreNetwork for NullNetwork {
        async fn catalog(&self, _member: &MemberIdentity) -> Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }

        async fn replicate(
            &self,
            _target: &MemberIdentity,
            _stored_name: &str,
            _holders: Vec<MemberIdentity>,
        ) -> Result<FileMessageKind> {
            Ok(FileMessageKind::Ok)
        }

        async fn delete(&self, _holder: &MemberIdentity, _stored_name: &str) -> Result<()> {
            Ok(())
        }
    }

    fn id(port: u16) -> MemberIdentity {
        MemberIdentity::new("10.0.0.1", port, 1)
    }

    async fn coordinator(ports: &[u16]) -> Arc<Coordinator> {
        let ring = MemberList::new(MembershipRing::new(id(ports[0])));
        for port in &ports[1..] {
            ring.add(id(*port));
        }
        Coordinator::start(
            ring.reader(),
            Arc::new(NullNetwork),
            Arc::new(RandomPlacement::default()),
            CoordinatorConfig::default(),
        )
        .await
    }

    fn request(kind: FileMessageKind, file: &str) -> FileMessage {
        FileMessage::request(kind, Destination::Coordinator, file)
    }

    #[tokio::test]
    async fn test_put_plans_up_to_four_targets() {
        let coordinator = coordinator(&[1, 2, 3, 4, 5, 6]).await;
        let reply = coordinator
            .handle(request(FileMessageKind::Put, "a.txt"))
            .await
            .unwrap();

        assert!(reply.is_ok());
        assert_eq!(reply.version, Some(1));
        assert_eq!(reply.nodes.len(), 4);
    }

    #[tokio::test]
    async fn test_get_of_unknown_file_fails() {
        let coordinator = coordinator(&[1]).await;
        let reply = coordinator
            .handle(request(FileMessageKind::Get, "a.txt"))
            .await
            .unwrap();
        assert_eq!(reply.kind, FileMessageKind::Fail);
    }

    #[tokio::test]
    async fn test_put_ok_and_put_fail_need_no_reply() {
        let coordinator = coordinator(&[1]).await;
        coordinator.handle(request(FileMessageKind::Put, "a.txt")).await;

        let ok = request(FileMessageKind::PutOk, "a.txt")
            .with_version(1)
            .with_nodes(vec![id(1)]);
        assert!(coordinator.handle(ok).await.is_none());

        let fail = request(FileMessageKind::PutFail, "a.txt").with_version(2);
        assert!(coordinator.handle(fail).await.is_none());
    }

    #[tokio::test]
    async fn test_unexpected_kind_fails() {
        let coordinator = coordinator(&[1]).await;
        let reply = coordinator
            .handle(request(FileMessageKind::Replicate, "a.txt"))
            .await
            .unwrap();
        assert_eq!(reply.kind, FileMessageKind::Fail);
    }

    #[tokio::test]
    async fn test_recovery_with_failing_catalog() {
        struct Partial(HashMap<MemberIdentity, BTreeSet<String>>);

        #[async_trait]
        impl StoreNetwork for Partial {
            async fn catalog(&self, member: &MemberIdentity) -> Result<BTreeSet<String>> {
                self.0.get(member).cloned().ok_or(crate::error::ReplicationError::UnexpectedReply(
                    FileMessageKind::Fail,
                ))
            }

            async fn replicate(
                &self,
                _target: &MemberIdentity,
                _stored_name: &str,
                _holders: Vec<MemberIdentity>,
            ) -> Result<FileMessageKind> {
                Ok(FileMessageKind::Fail)
            }

            async fn delete(&self, _holder: &MemberIdentity, _stored_name: &str) -> Result<()> {
                Ok(())
            }
        }

        let ring = MemberList::new(MembershipRing::new(id(1)));
        ring.add(id(2));
        let network = Partial(HashMap::from([(id(1), BTreeSet::from(["a_2.txt".to_string()]))]));

        let coordinator = Coordinator::start(
            ring.reader(),
            Arc::new(network),
            Arc::new(RandomPlacement::default()),
            CoordinatorConfig::default(),
        )
        .await;

        let reply = coordinator.handle(request(FileMessageKind::Get, "a.txt")).await.unwrap();
        assert_eq!(reply.file, "a_2.txt");
        assert_eq!(reply.nodes, vec![id(1)]);
    }
}
