//! Member identity for the membership ring.
//!
//! A member is identified by where it listens (`host`, `port`) and when it
//! joined. The join timestamp makes every incarnation distinct: a process that
//! leaves and rejoins on the same `host:port` is a different member.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Identity of one incarnation of a cluster member.
///
/// Immutable once created. Ordering is lexicographic over
/// `(host, port, joined_at)`; that order is the ring order and also ranks
/// candidates during election.
///
/// # Example
///
/// ```rust
/// use corelib::MemberIdentity;
///
/// let a = MemberIdentity::new("node-a", 7000, 1);
/// let b = MemberIdentity::new("node-a", 7000, 2);
/// assert_ne!(a, b); // same endpoint, different incarnation
/// assert!(a < b);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct MemberIdentity {
    /// Hostname or IP the member listens on (TCP and UDP).
    pub host: String,
    /// Port shared by the TCP listener and the UDP failure-detector socket.
    pub port: u16,
    /// Join time in milliseconds since the Unix epoch.
    pub joined_at: u64,
}

impl MemberIdentity {
    /// Construct an identity from its three parts.
    pub fn new(host: impl Into<String>, port: u16, joined_at: u64) -> Self {
        Self {
            host: host.into(),
            port,
            joined_at,
        }
    }

    /// Create a fresh incarnation stamped with the current wall-clock time.
    pub fn joining_now(host: impl Into<String>, port: u16) -> Self {
        let joined_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self::new(host, port, joined_at)
    }

    /// `host:port` string suitable for `TcpStream::connect` / `UdpSocket::send_to`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Same endpoint, regardless of incarnation.
    pub fn same_endpoint(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for MemberIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.host, self.port, self.joined_at)
    }
}

/// Split a `host:port` string into its parts.
///
/// The port is taken after the last `:` so bracket-free IPv6 literals are not
/// supported; hostnames and IPv4 addresses are.
pub fn parse_endpoint(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidAddress(address.to_string()))?;
    if host.is_empty() {
        return Err(Error::InvalidAddress(address.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    Ok((host.to_string(), port))
}
