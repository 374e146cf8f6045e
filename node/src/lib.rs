//! Node library crate.
//!
//! This crate provides the building blocks of a NADO ledger node:
//!
//! - strongly-typed domain records (`types`),
//! - hashing, keys and the address codec (`hashing`, `keys`, `address`),
//! - storage engines for blocks, accounts, the transaction index and the
//!   peer registry (`storage`),
//! - transaction pool operations (`pool`),
//! - the HTTP gossip client (`gossip`),
//! - shared node state and its locking discipline (`memserver`, `context`),
//! - consensus hash-voting and trust (`consensus`),
//! - producer election, block construction and rollback (`production`,
//!   `rollback`, `sync`),
//! - the four worker loops (`loops`),
//! - Prometheus metrics (`metrics`),
//! - and the first-start bootstrap (`genesis`).
//!
//! Higher-level binaries compose these pieces into a full node; the HTTP
//! surface lives in the `api-gateway` crate.

pub mod address;
pub mod config;
pub mod consensus;
pub mod context;
pub mod error;
pub mod genesis;
pub mod gossip;
pub mod hashing;
pub mod keys;
pub mod loops;
pub mod memserver;
pub mod metrics;
pub mod pool;
pub mod production;
pub mod rollback;
pub mod storage;
pub mod sync;
pub mod types;

// Re-export the handles a node binary wires together.
pub use config::{BLOCK_TIME, NodeConfig, PROTOCOL, VERSION, get_home, get_timestamp_seconds};
pub use context::NodeContext;
pub use error::{NodeError, Result};
pub use gossip::GossipClient;
pub use memserver::{MemServer, MergeOutcome};
pub use metrics::NodeMetrics;
pub use storage::Stores;

// Re-export domain types at the crate root for convenience.
pub use types::*;
