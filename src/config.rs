//! Configuration module for conclave.
//!
//! Configuration is read once at startup from a JSON file and validated
//! before the core starts; a node that cannot parse its peer list or its
//! own id never comes up.

use crate::error::{ConclaveError, Result};
use crate::types::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// A `host:port` pair identifying a peer endpoint.
///
/// The position of an address in the configured peer list implies the
/// peer's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for PeerAddr {
    type Err = ConclaveError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ConclaveError::Config(format!("peer address '{}' is not host:port", s)))?;
        if host.is_empty() {
            return Err(ConclaveError::Config(format!("peer address '{}' has an empty host", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ConclaveError::Config(format!("peer address '{}' has an invalid port", s)))?;
        Ok(Self { host: host.to_string(), port })
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Raft timing parameters.
///
/// Election timeouts are randomized per node within
/// `[election_timeout_min, election_timeout_max]`; the heartbeat interval
/// must stay well below the election minimum so a live leader suppresses
/// elections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftTiming {
    /// Minimum election timeout in milliseconds.
    #[serde(default = "default_election_min")]
    pub election_timeout_min_ms: u64,
    /// Maximum election timeout in milliseconds.
    #[serde(default = "default_election_max")]
    pub election_timeout_max_ms: u64,
    /// Leader heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_ms: u64,
    /// Period of the tick task in milliseconds.
    #[serde(default = "default_tick")]
    pub tick_interval_ms: u64,
}

fn default_election_min() -> u64 {
    150
}

fn default_election_max() -> u64 {
    300
}

fn default_heartbeat() -> u64 {
    50
}

fn default_tick() -> u64 {
    25
}

impl Default for RaftTiming {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: default_election_min(),
            election_timeout_max_ms: default_election_max(),
            heartbeat_interval_ms: default_heartbeat(),
            tick_interval_ms: default_tick(),
        }
    }
}

impl RaftTiming {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.election_timeout_min_ms == 0 {
            return Err(ConclaveError::InvalidConfig {
                field: "raft.election_timeout_min_ms".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        if self.election_timeout_max_ms < self.election_timeout_min_ms {
            return Err(ConclaveError::InvalidConfig {
                field: "raft.election_timeout_max_ms".to_string(),
                reason: "must be >= election_timeout_min_ms".to_string(),
            });
        }
        if self.heartbeat_interval_ms == 0
            || self.heartbeat_interval_ms >= self.election_timeout_min_ms
        {
            return Err(ConclaveError::InvalidConfig {
                field: "raft.heartbeat_interval_ms".to_string(),
                reason: "must be non-zero and below election_timeout_min_ms".to_string(),
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(ConclaveError::InvalidConfig {
                field: "raft.tick_interval_ms".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Main configuration for a conclave node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConclaveConfig {
    /// This node's id (an index into `peers`).
    pub id: PeerId,
    /// Ordered `host:port` peer list; the index implies the peer id.
    pub peers: Vec<String>,
    /// Debug mode: run every peer of the cluster inside this process.
    #[serde(default)]
    pub debug: bool,
    /// Raft timing parameters.
    #[serde(default)]
    pub raft: RaftTiming,
}

impl ConclaveConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConclaveError::Config(format!("failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ConclaveError::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistencies.
    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(ConclaveError::InvalidConfig {
                field: "peers".to_string(),
                reason: "at least one peer is required".to_string(),
            });
        }
        if (self.id as usize) >= self.peers.len() {
            return Err(ConclaveError::InvalidConfig {
                field: "id".to_string(),
                reason: format!("id {} is out of range for {} peers", self.id, self.peers.len()),
            });
        }
        // Every peer address must parse; a bad peer list aborts startup.
        self.peer_addrs()?;
        self.raft.validate()?;
        Ok(())
    }

    /// Parse the configured peer list into addresses.
    pub fn peer_addrs(&self) -> Result<Vec<PeerAddr>> {
        self.peers.iter().map(|s| s.parse()).collect()
    }

    /// Number of peers in the cluster, including this node.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Create a minimal development configuration for an in-process cluster.
    pub fn development(cluster_size: usize) -> Self {
        Self {
            id: 0,
            peers: (0..cluster_size)
                .map(|i| format!("127.0.0.1:{}", 9600 + i))
                .collect(),
            debug: true,
            raft: RaftTiming::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_addr_parse() {
        let addr: PeerAddr = "127.0.0.1:9600".parse().unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 9600);
        assert_eq!(addr.to_string(), "127.0.0.1:9600");
    }

    #[test]
    fn test_peer_addr_rejects_garbage() {
        assert!("localhost".parse::<PeerAddr>().is_err());
        assert!(":9600".parse::<PeerAddr>().is_err());
        assert!("host:notaport".parse::<PeerAddr>().is_err());
        assert!("host:99999".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_development_config_is_valid() {
        let config = ConclaveConfig::development(3);
        assert!(config.validate().is_ok());
        assert_eq!(config.peer_count(), 3);
    }

    #[test]
    fn test_validate_rejects_out_of_range_id() {
        let mut config = ConclaveConfig::development(3);
        config.id = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_peer() {
        let mut config = ConclaveConfig::development(3);
        config.peers[1] = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_timing() {
        let mut config = ConclaveConfig::development(3);
        config.raft.heartbeat_interval_ms = 500;
        assert!(config.validate().is_err());
    }
}
