//! Error kinds shared across the node.
//!
//! The variants map one-to-one to the recovery policies the workers apply:
//! transient storage errors are retried with backoff, validation failures
//! reject the input (and cost a remote peer trust), timeouts mark the peer
//! failed, divergence flips the node into emergency mode, and fatal errors
//! end the process.

use thiserror::Error;

/// Unified error type for the node library.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Disk or database busy; safe to retry with backoff.
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    /// A mutation would break an accounting invariant (negative balance,
    /// negative burn, unknown account). The mutation is refused.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Malformed or dishonest input: bad signature, wrong address, txid
    /// collision, overspending, target block out of range.
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// A gossip peer did not answer within the timeout.
    #[error("network timeout: {0}")]
    NetworkTimeout(String),

    /// Peer speaks an older protocol than we do.
    #[error("protocol mismatch: peer {peer} below local {local}")]
    ProtocolMismatch { local: u32, peer: u32 },

    /// Our latest block differs from the network majority.
    #[error("consensus divergence: {0}")]
    ConsensusDivergence(String),

    /// Unrecoverable condition (key file unreadable, bind failure).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl NodeError {
    /// Shorthand for a [`NodeError::ValidationFailure`].
    pub fn validation(msg: impl Into<String>) -> Self {
        NodeError::ValidationFailure(msg.into())
    }

    /// Shorthand for a [`NodeError::InvariantViolation`].
    pub fn invariant(msg: impl Into<String>) -> Self {
        NodeError::InvariantViolation(msg.into())
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::TransientStorage(e.to_string())
    }
}

impl From<rocksdb::Error> for NodeError {
    fn from(e: rocksdb::Error) -> Self {
        NodeError::TransientStorage(e.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::ValidationFailure(format!("json: {e}"))
    }
}

impl From<rmp_serde::encode::Error> for NodeError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        NodeError::ValidationFailure(format!("msgpack encode: {e}"))
    }
}

impl From<rmp_serde::decode::Error> for NodeError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        NodeError::ValidationFailure(format!("msgpack decode: {e}"))
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        NodeError::NetworkTimeout(e.to_string())
    }
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_render_their_policy_context() {
        let e = NodeError::ProtocolMismatch { local: 3, peer: 1 };
        assert_eq!(e.to_string(), "protocol mismatch: peer 1 below local 3");

        let e = NodeError::validation("bad signature");
        assert!(e.to_string().contains("bad signature"));
    }

    #[test]
    fn io_errors_map_to_transient_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk busy");
        let e: NodeError = io.into();
        assert!(matches!(e, NodeError::TransientStorage(_)));
    }
}
