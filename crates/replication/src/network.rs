//! How the coordinator reaches file stores.

use async_trait::async_trait;
use corelib::naming::versioned_name;
use corelib::MemberIdentity;
use std::collections::BTreeSet;
use streaming::{Destination, FileMessage, FileMessageKind, Message, Transport};

use crate::error::{ReplicationError, Result};

/// Coordinator -> file store operations.
#[async_trait]
pub trait StoreNetwork: Send + Sync + 'static {
    /// Every stored (versioned) name on `member`.
    async fn catalog(&self, member: &MemberIdentity) -> Result<BTreeSet<String>>;

    /// Order `target` to pull `stored_name` from one of `holders`.
    ///
    /// # Returns
    /// `Ok`, `FileExists` or `Fail` as answered by the target
    async fn replicate(
        &self,
        target: &MemberIdentity,
        stored_name: &str,
        holders: Vec<MemberIdentity>,
    ) -> Result<FileMessageKind>;

    /// Fire-and-forget removal of `stored_name` on `holder`.
    async fn delete(&self, holder: &MemberIdentity, stored_name: &str) -> Result<()>;

    /// Convenience for the per-version delete fan-out.
    async fn delete_version(&self, holder: &MemberIdentity, file: &str, version: u64) -> Result<()> {
        self.delete(holder, &versioned_name(file, version)).await
    }
}

/// `StoreNetwork` over the member wire protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpStoreNetwork {
    transport: Transport,
}

impl TcpStoreNetwork {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

fn to_file_server(kind: FileMessageKind, file: &str) -> FileMessage {
    FileMessage::request(kind, Destination::FileServer, file)
}

#[async_trait]
impl StoreNetwork for TcpStoreNetwork {
    async fn catalog(&self, member: &MemberIdentity) -> Result<BTreeSet<String>> {
        let request = Message::File(to_file_server(FileMessageKind::CoordinatorStoreRequest, ""));
        let reply: FileMessage = self.transport.request(member, &request).await?;
        match reply.files_on_node {
            Some(files) => Ok(files),
            None => Err(ReplicationError::UnexpectedReply(reply.kind)),
        }
    }

    async fn replicate(
        &self,
        target: &MemberIdentity,
        stored_name: &str,
        holders: Vec<MemberIdentity>,
    ) -> Result<FileMessageKind> {
        let request =
            Message::File(to_file_server(FileMessageKind::Replicate, stored_name).with_nodes(holders));
        let reply: FileMessage = self
            .transport
            .request_after_transfer(target, &request)
            .await?;
        Ok(reply.kind)
    }

    async fn delete(&self, holder: &MemberIdentity, stored_name: &str) -> Result<()> {
        let request = Message::File(to_file_server(FileMessageKind::Delete, stored_name));
        self.transport.send(holder, &request).await?;
        Ok(())
    }
}
