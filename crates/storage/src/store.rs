//! Per-node file server.
//!
//! Stores versioned files (`name_v.ext`) as flat entries in one directory.
//! The directory is wiped when the store opens: a restarted node never trusts
//! what it held before, which is why coordinator recovery treats each node's
//! catalog as the complete truth.
//!
//! Every request is answered with a reply frame before any file bytes move.

use corelib::naming::matches_logical;
use corelib::{MemberIdentity, RingReader};
use dashmap::DashSet;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use streaming::codec::write_frame;
use streaming::receiver::{is_partial_name, receive_file, send_file};
use streaming::{Destination, FileMessage, FileMessageKind, Message, Transport};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};

pub struct FileStore {
    root: PathBuf,
    /// Names fully persisted and servable.
    files: DashSet<String>,
    /// Names currently being received; guards against concurrent Puts.
    receiving: DashSet<String>,
    /// Receptions a delete matched while they were in flight.
    cancelled: DashSet<String>,
    ring: RingReader,
    transport: Transport,
}

impl FileStore {
    /// Open (and clear) the store rooted at `root`.
    pub async fn open(root: PathBuf, ring: RingReader, transport: Transport) -> Result<Self> {
        if fs::try_exists(&root).await? {
            fs::remove_dir_all(&root).await?;
        }
        fs::create_dir_all(&root).await?;
        info!(root = %root.display(), "file store opened");

        Ok(Self {
            root,
            files: DashSet::new(),
            receiving: DashSet::new(),
            cancelled: DashSet::new(),
            ring,
            transport,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains(name)
    }

    /// Stored names, sorted.
    pub fn local_files(&self) -> BTreeSet<String> {
        self.files.iter().map(|name| name.key().clone()).collect()
    }

    /// Serve one request on an accepted connection.
    pub async fn handle<S>(&self, message: FileMessage, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(kind = ?message.kind, file = %message.file, "file server request");

        match message.kind {
            FileMessageKind::Get => self.serve_get(&message.file, stream).await,
            FileMessageKind::Put => self.accept_put(&message.file, message.size, stream).await,
            FileMessageKind::Replicate => {
                let reply = self.replicate(&message.file, message.nodes).await;
                write_frame(stream, &FileMessage::reply(reply)).await?;
                Ok(())
            }
            FileMessageKind::Delete => {
                self.delete(&message.file).await;
                Ok(())
            }
            FileMessageKind::CoordinatorStoreRequest => {
                let reply = FileMessage::ok().with_files(self.local_files());
                write_frame(stream, &reply).await?;
                Ok(())
            }
            other => {
                warn!(kind = ?other, "unexpected message for file server");
                write_frame(stream, &FileMessage::fail()).await?;
                Ok(())
            }
        }
    }

    async fn serve_get<S>(&self, name: &str, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.files.contains(name) {
            write_frame(stream, &FileMessage::fail()).await?;
            return Ok(());
        }

        let path = self.path_of(name)?;
        let size = fs::metadata(&path).await?.len();
        write_frame(stream, &FileMessage::ok().with_size(size)).await?;
        let sent = send_file(stream, &path).await?;
        stream.shutdown().await?;
        debug!(file = name, bytes = sent, "served file");
        Ok(())
    }

    async fn accept_put<S>(&self, name: &str, size: Option<u64>, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let path = match self.path_of(name) {
            Ok(path) => path,
            Err(e) => {
                warn!(file = name, "rejecting put: {}", e);
                write_frame(stream, &FileMessage::fail()).await?;
                return Ok(());
            }
        };

        // No overwrite, and only one writer per name at a time.
        if self.files.contains(name) || !self.begin_receiving(name) {
            write_frame(stream, &FileMessage::fail()).await?;
            return Ok(());
        }

        let result = async {
            write_frame(stream, &FileMessage::ok()).await?;
            let received = receive_file(stream, &path, size).await?;
            if self.publish(name, &path).await {
                info!(file = name, bytes = received, "stored file");
                write_frame(stream, &FileMessage::ok()).await?;
            } else {
                write_frame(stream, &FileMessage::fail()).await?;
            }
            Ok::<_, StorageError>(())
        }
        .await;

        self.end_receiving(name);
        result
    }

    /// Pull `name` from one of `holders` unless it is already stored.
    ///
    /// Holders are tried in random order; holders no longer in the ring are
    /// skipped. Returns `FileExists`, `Ok` or `Fail`.
    pub async fn replicate(&self, name: &str, mut holders: Vec<MemberIdentity>) -> FileMessageKind {
        if self.files.contains(name) {
            return FileMessageKind::FileExists;
        }
        let path = match self.path_of(name) {
            Ok(path) => path,
            Err(e) => {
                warn!(file = name, "rejecting replicate: {}", e);
                return FileMessageKind::Fail;
            }
        };
        if !self.begin_receiving(name) {
            return FileMessageKind::Fail;
        }

        holders.shuffle(&mut rand::thread_rng());
        let request = Message::File(FileMessage::request(
            FileMessageKind::Get,
            Destination::FileServer,
            name,
        ));

        let mut outcome = FileMessageKind::Fail;
        for holder in holders {
            if !self.ring.contains(&holder) {
                continue;
            }
            match self.transport.pull_file(&holder, &request, &path).await {
                Ok(ack) if ack.is_ok() => {
                    if self.publish(name, &path).await {
                        info!(file = name, from = %holder, "replicated file");
                        outcome = FileMessageKind::Ok;
                    }
                    break;
                }
                Ok(ack) => debug!(file = name, from = %holder, kind = ?ack.kind, "holder refused"),
                Err(e) => warn!(file = name, from = %holder, "pull failed: {}", e),
            }
        }

        self.end_receiving(name);
        if outcome != FileMessageKind::Ok {
            warn!(file = name, "could not replicate from any holder");
        }
        outcome
    }

    /// Remove `target` and every version of logical `target`. Returns how many
    /// files were removed. Matching receptions still in flight are discarded
    /// when they complete.
    pub async fn delete(&self, target: &str) -> usize {
        for name in self.receiving.iter() {
            if matches_logical(name.key(), target) {
                debug!(file = %name.key(), "cancelling reception in flight");
                self.cancelled.insert(name.key().clone());
            }
        }

        let doomed: Vec<String> = self
            .files
            .iter()
            .filter(|name| matches_logical(name.key(), target))
            .map(|name| name.key().clone())
            .collect();

        let mut removed = 0;
        for name in doomed {
            self.files.remove(&name);
            match fs::remove_file(self.root.join(&name)).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, "failed to remove: {}", e),
            }
        }
        info!(target, removed, "deleted files");
        removed
    }

    fn begin_receiving(&self, name: &str) -> bool {
        if !self.receiving.insert(name.to_string()) {
            return false;
        }
        self.cancelled.remove(name);
        true
    }

    fn end_receiving(&self, name: &str) {
        self.receiving.remove(name);
        self.cancelled.remove(name);
    }

    /// Make a fully received file servable, unless a delete matched it while
    /// it was in flight. Returns whether the file was kept.
    async fn publish(&self, name: &str, path: &Path) -> bool {
        // Insert before checking: a delete marks first and scans second.
        self.files.insert(name.to_string());
        if self.cancelled.remove(name).is_none() {
            return true;
        }
        self.files.remove(name);
        if let Err(e) = fs::remove_file(path).await {
            debug!(file = name, "discarded file already gone: {}", e);
        }
        info!(file = name, "deleted while in flight, discarded");
        false
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        let invalid = name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name == "."
            || name == ".."
            || is_partial_name(name);
        if invalid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}
