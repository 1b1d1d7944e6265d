//! Member configuration.

use std::path::PathBuf;
use std::time::Duration;
use streaming::TransportConfig;

use crate::detector::DetectorConfig;

/// Every tunable of a member, defaulting to the cluster's standard timings.
#[derive(Debug, Clone)]
pub struct MemberConfig {
    /// Host the member binds and advertises.
    pub host: String,
    /// Shared TCP/UDP port; 0 picks an ephemeral port.
    pub port: u16,
    /// `host:port` of the introducer. `None` founds a new group.
    pub introducer: Option<String>,
    /// Files are stored under `storage_root/<host>/<port>`.
    pub storage_root: PathBuf,
    /// Interval between failure-detector rounds.
    pub protocol_period: Duration,
    /// How long to wait for an ack before suspecting a successor.
    pub ping_timeout: Duration,
    /// Successors pinged per round.
    pub monitors: usize,
    /// Interval between coordinator repair passes.
    pub repair_period: Duration,
    /// Target holders per file version.
    pub replication_factor: usize,
    pub transport: TransportConfig,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            introducer: None,
            storage_root: PathBuf::from("storage"),
            protocol_period: Duration::from_millis(1500),
            ping_timeout: Duration::from_millis(500),
            monitors: 1,
            repair_period: Duration::from_secs(10),
            replication_factor: 4,
            transport: TransportConfig::default(),
        }
    }
}

impl MemberConfig {
    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig {
            protocol_period: self.protocol_period,
            ping_timeout: self.ping_timeout,
            monitors: self.monitors,
        }
    }

    /// Directory holding this member's files.
    pub fn storage_dir(&self, port: u16) -> PathBuf {
        self.storage_root.join(&self.host).join(port.to_string())
    }
}
