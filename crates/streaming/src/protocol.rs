//! Message definitions.
//!
//! Two families travel between members over TCP, wrapped in `Message`:
//!
//! - `MembershipMessage`: one subject identity plus the event kind
//! - `FileMessage`: a file operation or reply, routed by `Destination`
//!
//! Failure-detector pings travel over UDP as `Datagram`s. The introducer
//! speaks its own request/reply pair.

use corelib::MemberIdentity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version number -> members holding that version.
pub type VersionMap = BTreeMap<u64, BTreeSet<MemberIdentity>>;

/// First frame of every inbound member connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Membership(MembershipMessage),
    File(FileMessage),
}

/// Membership event about a single subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipMessage {
    /// Subject joined the group.
    Join(MemberIdentity),
    /// Subject left voluntarily.
    Leave(MemberIdentity),
    /// Subject was detected as failed.
    Crash(MemberIdentity),
    /// Failure-detector probe from the subject.
    Ping(MemberIdentity),
    /// Reply to a ping, subject is the responder.
    Ack(MemberIdentity),
    /// Subject asks for a membership snapshot (join handshake).
    MemberListRequest(MemberIdentity),
    /// Introducer liveness probe; no reply beyond accepting the connection.
    IntroducerCheckAlive(MemberIdentity),
    /// Election token carrying the current candidate.
    ElectionId(MemberIdentity),
    /// Election result carrying the new coordinator.
    Elected(MemberIdentity),
}

impl MembershipMessage {
    pub fn subject(&self) -> &MemberIdentity {
        match self {
            MembershipMessage::Join(id)
            | MembershipMessage::Leave(id)
            | MembershipMessage::Crash(id)
            | MembershipMessage::Ping(id)
            | MembershipMessage::Ack(id)
            | MembershipMessage::MemberListRequest(id)
            | MembershipMessage::IntroducerCheckAlive(id)
            | MembershipMessage::ElectionId(id)
            | MembershipMessage::Elected(id) => id,
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            MembershipMessage::Join(_) => "join",
            MembershipMessage::Leave(_) => "leave",
            MembershipMessage::Crash(_) => "crash",
            MembershipMessage::Ping(_) => "ping",
            MembershipMessage::Ack(_) => "ack",
            MembershipMessage::MemberListRequest(_) => "member-list-request",
            MembershipMessage::IntroducerCheckAlive(_) => "introducer-check-alive",
            MembershipMessage::ElectionId(_) => "election-id",
            MembershipMessage::Elected(_) => "elected",
        }
    }
}

/// What a `FileMessage` asks for or reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileMessageKind {
    Get,
    Put,
    PutOk,
    PutFail,
    Delete,
    /// Pull a versioned file from one of the listed holders (a "store" order).
    Replicate,
    GetVersions,
    Ok,
    Fail,
    FileExists,
    CoordinatorStoreRequest,
}

/// Which handler on the receiving member processes the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    Coordinator,
    FileServer,
    /// Replies travelling back on an existing connection.
    Client,
}

/// File operation request or reply.
///
/// Optional payloads are populated per kind:
///
/// | kind                                  | payload                          |
/// |---------------------------------------|----------------------------------|
/// | `Put` reply                           | `nodes` (targets), `version`     |
/// | `Put` to a file server                | `size` of the body               |
/// | `Get` reply                           | `file` (versioned), `nodes`      |
/// | `Ok` before a file body               | `size` of the body               |
/// | `PutOk` / `PutFail`                   | `nodes` (succeeded), `version`   |
/// | `Replicate`                           | `nodes` (candidate holders)      |
/// | `GetVersions` reply                   | `versions`                       |
/// | `CoordinatorStoreRequest` reply       | `files_on_node`                  |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMessage {
    pub kind: FileMessageKind,
    pub destination: Destination,
    pub file: String,
    pub nodes: Vec<MemberIdentity>,
    pub version: Option<u64>,
    pub versions: Option<VersionMap>,
    pub files_on_node: Option<BTreeSet<String>>,
    /// Byte length of the file body that follows (or is about to be sent).
    pub size: Option<u64>,
}

impl FileMessage {
    /// Request for `destination` about `file`.
    pub fn request(kind: FileMessageKind, destination: Destination, file: impl Into<String>) -> Self {
        Self {
            kind,
            destination,
            file: file.into(),
            nodes: Vec::new(),
            version: None,
            versions: None,
            files_on_node: None,
            size: None,
        }
    }

    /// Reply travelling back to the requester.
    pub fn reply(kind: FileMessageKind) -> Self {
        Self::request(kind, Destination::Client, String::new())
    }

    pub fn ok() -> Self {
        Self::reply(FileMessageKind::Ok)
    }

    pub fn fail() -> Self {
        Self::reply(FileMessageKind::Fail)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<MemberIdentity>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_versions(mut self, versions: VersionMap) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn with_files(mut self, files: BTreeSet<String>) -> Self {
        self.files_on_node = Some(files);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.kind == FileMessageKind::Ok
    }
}

/// UDP failure-detector packet. `seq` ties an `Ack` to the ping it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    pub seq: u64,
    pub message: MembershipMessage,
}

/// Sent by a joining member to the introducer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroducerRequest {
    pub joining: MemberIdentity,
}

/// Some live member of the group, or `None` if the joiner is the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroducerReply {
    pub group_member: Option<MemberIdentity>,
}
