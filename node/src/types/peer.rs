//! Peer and status records.
//!
//! Gossip returns bytes that decode into these tagged records; dynamic
//! maps never cross the module boundary.

use serde::{Deserialize, Serialize};

/// A peer as persisted in the registry, one file per IP.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Address the peer signs blocks with.
    pub peer_address: String,
    pub peer_ip: String,
    pub peer_port: u16,
    /// Signed trust score; rewarded for majority agreement, penalized for
    /// unreachability, protocol mismatch and invalid gossip.
    pub peer_trust: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

/// Default trust granted to a newly-stored peer.
pub const DEFAULT_PEER_TRUST: i64 = 50;

impl PeerRecord {
    /// A fresh record with default trust.
    pub fn new(ip: impl Into<String>, port: u16, address: impl Into<String>) -> Self {
        PeerRecord {
            peer_address: address.into(),
            peer_ip: ip.into(),
            peer_port: port,
            peer_trust: DEFAULT_PEER_TRUST,
            last_seen: None,
        }
    }
}

/// Snapshot a node reports at `/status`.
///
/// The consensus loop derives the per-peer hash pools from these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub reported_uptime: u64,
    pub address: String,
    pub transaction_pool_hash: Option<String>,
    pub block_producers_hash: Option<String>,
    pub latest_block_hash: String,
    pub earliest_block_hash: String,
    pub protocol: u32,
    pub version: String,
}
