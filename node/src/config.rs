//! Node configuration and on-disk layout.
//!
//! Configuration lives as JSON under `private/config.dat` in the node home
//! directory. The home defaults to `$HOME/nado` and can be overridden (for
//! tests and multi-node setups) through the `NADO_HOME` environment
//! variable or by constructing stores against an explicit path.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::hashing;

/// Gossip protocol revision spoken by this build.
pub const PROTOCOL: u32 = 3;

/// Crate version reported in `/status`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seconds between block boundaries.
pub const BLOCK_TIME: u64 = 60;

/// Returns the current wall-clock time as seconds since Unix epoch.
pub fn get_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Returns the node home directory.
///
/// `NADO_HOME` wins when set; otherwise `$HOME/nado`.
pub fn get_home() -> PathBuf {
    if let Ok(custom) = std::env::var("NADO_HOME") {
        return PathBuf::from(custom);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join("nado")
}

fn default_port() -> u16 {
    9173
}

fn default_protocol() -> u32 {
    PROTOCOL
}

fn default_min_peers() -> usize {
    5
}

fn default_peer_limit() -> usize {
    24
}

fn default_max_rollbacks() -> u32 {
    10
}

fn default_cascade_limit() -> usize {
    1
}

/// Height below which the signed message is the canonical MessagePack
/// encoding of the transaction rather than the raw txid bytes.
fn default_legacy_signature_height() -> u64 {
    102_000
}

/// Height at and below which fees are neither debited from senders nor
/// accumulated into totals.
fn default_legacy_fee_height() -> u64 {
    111_111
}

/// Persisted node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// HTTP port the node listens and gossips on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public IPv4 address of this node as seen by peers.
    pub ip: String,

    /// Gossip protocol revision; peers below ours are purged.
    #[serde(default = "default_protocol")]
    pub protocol: u32,

    /// Shared secret for privileged endpoints (`/terminate`, `/force_sync`).
    pub server_key: String,

    /// Minimum reachable peers before block production is allowed.
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,

    /// Hard cap on the linked peer set.
    #[serde(default = "default_peer_limit")]
    pub peer_limit: usize,

    /// Rollbacks allowed in a single recovery attempt before bailing.
    #[serde(default = "default_max_rollbacks")]
    pub max_rollbacks: u32,

    /// How many distinct majority hashes to walk when picking a sync source.
    #[serde(default = "default_cascade_limit")]
    pub cascade_limit: usize,

    /// Accept sync sources regardless of trust.
    #[serde(default)]
    pub promiscuous: bool,

    /// Skip full transaction validation for blocks older than a day.
    #[serde(default)]
    pub quick_sync: bool,

    #[serde(default = "default_legacy_signature_height")]
    pub legacy_signature_height: u64,

    #[serde(default = "default_legacy_fee_height")]
    pub legacy_fee_height: u64,
}

impl NodeConfig {
    /// Builds a fresh configuration for a node at `ip` with a random
    /// server key.
    pub fn template(ip: impl Into<String>) -> Self {
        let server_key: String = (0..8).map(|_| hashing::create_nonce()).collect();
        NodeConfig {
            port: default_port(),
            ip: ip.into(),
            protocol: default_protocol(),
            server_key,
            min_peers: default_min_peers(),
            peer_limit: default_peer_limit(),
            max_rollbacks: default_max_rollbacks(),
            cascade_limit: default_cascade_limit(),
            promiscuous: false,
            quick_sync: false,
            legacy_signature_height: default_legacy_signature_height(),
            legacy_fee_height: default_legacy_fee_height(),
        }
    }

    fn path(home: &Path) -> PathBuf {
        home.join("private").join("config.dat")
    }

    /// Loads the configuration from `home`.
    pub fn load(home: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(Self::path(home))
            .map_err(|e| NodeError::Fatal(format!("cannot read config: {e}")))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persists the configuration to `home`.
    pub fn save(&self, home: &Path) -> Result<()> {
        let path = Self::path(home);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    /// Loads the configuration if present, otherwise creates and saves a
    /// template for `ip`.
    pub fn load_or_create(home: &Path, ip: impl Into<String>) -> Result<Self> {
        if Self::path(home).exists() {
            Self::load(home)
        } else {
            let config = Self::template(ip);
            config.save(home)?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_roundtrips_through_disk() {
        let tmp = TempDir::new().expect("create temp dir");
        let mut config = NodeConfig::template("203.0.113.7");
        config.min_peers = 2;
        config.promiscuous = true;
        config.save(tmp.path()).expect("save config");

        let loaded = NodeConfig::load(tmp.path()).expect("load config");
        assert_eq!(loaded.ip, "203.0.113.7");
        assert_eq!(loaded.min_peers, 2);
        assert!(loaded.promiscuous);
        assert_eq!(loaded.server_key, config.server_key);
        assert_eq!(loaded.legacy_fee_height, 111_111);
    }

    #[test]
    fn load_or_create_is_idempotent() {
        let tmp = TempDir::new().expect("create temp dir");
        let first = NodeConfig::load_or_create(tmp.path(), "198.51.100.1").expect("create");
        let second = NodeConfig::load_or_create(tmp.path(), "198.51.100.2").expect("reload");
        // Second call must load the stored config, not regenerate it.
        assert_eq!(first.ip, second.ip);
        assert_eq!(first.server_key, second.server_key);
    }

    #[test]
    fn missing_config_is_fatal() {
        let tmp = TempDir::new().expect("create temp dir");
        let err = NodeConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
