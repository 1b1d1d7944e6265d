//! Client half of the distributed file operations.
//!
//! Every operation starts by asking the current coordinator; data then moves
//! directly between this node and the file stores the coordinator names.

use corelib::naming::{encode_remote, versioned_path};
use corelib::{MemberIdentity, RingReader};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use streaming::{Destination, FileMessage, FileMessageKind, Message, Transport, VersionMap};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};

/// Outcome of a successful put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub version: u64,
    pub stored_on: Vec<MemberIdentity>,
}

#[derive(Clone)]
pub struct FileClient {
    ring: RingReader,
    transport: Transport,
}

impl FileClient {
    pub fn new(ring: RingReader, transport: Transport) -> Self {
        Self { ring, transport }
    }

    /// Upload `local` as the next version of `remote`.
    pub async fn put(&self, local: &Path, remote: &str) -> Result<PutReceipt> {
        let size = match tokio::fs::metadata(local).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(local.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let remote = encode_remote(remote);

        let coordinator = self.coordinator()?;
        let plan = self
            .ask(&coordinator, FileMessageKind::Put, &remote)
            .await?;
        let version = plan
            .version
            .ok_or_else(|| StorageError::Rejected("put plan without a version".to_string()))?;
        let stored_name = corelib::naming::versioned_name(&remote, version);

        let mut pushes = JoinSet::new();
        for target in plan.nodes {
            let transport = self.transport;
            let source = local.to_path_buf();
            let request = Message::File(
                FileMessage::request(FileMessageKind::Put, Destination::FileServer, stored_name.clone())
                    .with_size(size),
            );
            pushes.spawn(async move {
                let outcome = transport.push_file(&target, &request, &source).await;
                (target, outcome)
            });
        }

        let mut stored_on = Vec::new();
        while let Some(joined) = pushes.join_next().await {
            let Ok((target, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(reply) if reply.is_ok() => stored_on.push(target),
                Ok(reply) => warn!(target = %target, kind = ?reply.kind, "target refused put"),
                Err(e) => warn!(target = %target, "put transfer failed: {}", e),
            }
        }
        stored_on.sort();

        let (kind, result) = if stored_on.is_empty() {
            (
                FileMessageKind::PutFail,
                Err(StorageError::PutFailed { file: remote.clone() }),
            )
        } else {
            (
                FileMessageKind::PutOk,
                Ok(PutReceipt {
                    version,
                    stored_on: stored_on.clone(),
                }),
            )
        };

        // Report back to whoever is coordinator now.
        let report = Message::File(
            FileMessage::request(kind, Destination::Coordinator, remote.clone())
                .with_nodes(stored_on)
                .with_version(version),
        );
        let coordinator = self.coordinator().unwrap_or(coordinator);
        if let Err(e) = self.transport.send(&coordinator, &report).await {
            warn!(file = %remote, "failed to report put outcome: {}", e);
        }

        if result.is_ok() {
            info!(file = %remote, version, "put complete");
        }
        result
    }

    /// Download the latest confirmed version of `remote` into `local`.
    /// Returns the member that served it.
    pub async fn get(&self, remote: &str, local: &Path) -> Result<MemberIdentity> {
        let remote = encode_remote(remote);
        let coordinator = self.coordinator()?;
        let plan = self
            .ask(&coordinator, FileMessageKind::Get, &remote)
            .await?;

        self.fetch(&plan.file, plan.nodes, local).await
    }

    /// Remove every version of `remote` from the cluster.
    pub async fn delete(&self, remote: &str) -> Result<()> {
        let remote = encode_remote(remote);
        let coordinator = self.coordinator()?;
        self.ask(&coordinator, FileMessageKind::Delete, &remote)
            .await?;
        info!(file = %remote, "deleted");
        Ok(())
    }

    /// Version map of `remote` as the coordinator knows it.
    pub async fn list_versions(&self, remote: &str) -> Result<VersionMap> {
        let remote = encode_remote(remote);
        let coordinator = self.coordinator()?;
        let reply = self
            .ask(&coordinator, FileMessageKind::GetVersions, &remote)
            .await?;
        Ok(reply.versions.unwrap_or_default())
    }

    /// Fetch the newest `count` confirmed versions of `remote`, each written to
    /// `local` with its version spliced into the name.
    ///
    /// Versions that no holder can serve are skipped with a warning.
    pub async fn get_versions(
        &self,
        remote: &str,
        count: usize,
        local: &Path,
    ) -> Result<Vec<(u64, PathBuf)>> {
        let versions = self.list_versions(remote).await?;
        let remote = encode_remote(remote);

        let mut fetched = Vec::new();
        let newest = versions
            .into_iter()
            .rev()
            .filter(|(_, holders)| !holders.is_empty())
            .take(count);
        for (version, holders) in newest {
            let stored_name = corelib::naming::versioned_name(&remote, version);
            let destination = versioned_path(local, version);
            match self
                .fetch(&stored_name, holders.into_iter().collect(), &destination)
                .await
            {
                Ok(_) => fetched.push((version, destination)),
                Err(e) => warn!(file = %remote, version, "skipping version: {}", e),
            }
        }
        Ok(fetched)
    }

    fn coordinator(&self) -> Result<MemberIdentity> {
        self.ring.coordinator().ok_or(StorageError::NoCoordinator)
    }

    async fn ask(
        &self,
        coordinator: &MemberIdentity,
        kind: FileMessageKind,
        remote: &str,
    ) -> Result<FileMessage> {
        let request = Message::File(FileMessage::request(kind, Destination::Coordinator, remote));
        let reply: FileMessage = self.transport.request(coordinator, &request).await?;
        match reply.kind {
            FileMessageKind::Ok => Ok(reply),
            FileMessageKind::Fail if kind != FileMessageKind::Put => {
                Err(StorageError::NotFound(remote.to_string()))
            }
            other => Err(StorageError::Rejected(format!("{other:?}"))),
        }
    }

    /// Try `holders` in random order until one serves `stored_name`.
    async fn fetch(
        &self,
        stored_name: &str,
        mut holders: Vec<MemberIdentity>,
        local: &Path,
    ) -> Result<MemberIdentity> {
        holders.shuffle(&mut rand::thread_rng());
        let request = Message::File(FileMessage::request(
            FileMessageKind::Get,
            Destination::FileServer,
            stored_name,
        ));

        for holder in holders {
            if !self.ring.contains(&holder) {
                continue;
            }
            match self.transport.pull_file(&holder, &request, local).await {
                Ok(ack) if ack.is_ok() => {
                    debug!(file = stored_name, from = %holder, "fetched");
                    return Ok(holder);
                }
                Ok(ack) => debug!(file = stored_name, from = %holder, kind = ?ack.kind, "holder refused"),
                Err(e) => warn!(file = stored_name, from = %holder, "fetch failed: {}", e),
            }
        }
        Err(StorageError::Unavailable(stored_name.to_string()))
    }
}
