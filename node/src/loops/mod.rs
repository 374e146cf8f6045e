//! The four worker loops of the node.
//!
//! Each worker is a spawned task executing a one-second sleep loop (the
//! message loop reports every ten). No iteration error ever aborts a
//! worker; failures are logged and the next cycle runs.
//!
//! Phase table driving the core loop:
//!
//! | condition | periods | meaning |
//! |---|---|---|
//! | uptime below block time | {0,1,2} | initialization |
//! | tip younger than 20 s, sync burst, or forced sync | {0} | merge user buffer |
//! | 20–40 s | {1} | merge node buffer |
//! | 40 s – block time | {2} | replace minority |
//! | past block time plus margin | {3} | produce |
//! | otherwise | {0,1,2} | hold |
//!
//! Field ownership across workers: the peer loop owns peer-set membership,
//! producers, bans and the status pool; the consensus loop owns trust and
//! the majority hashes; the core loop owns the latest block, the pools
//! (under the buffer lock), the mode flags and rollbacks. The purge list
//! accepts appends from anyone.

pub mod consensus;
pub mod core;
pub mod message;
pub mod peer;

use crate::context::NodeContext;

/// Spawns all four workers onto the current runtime.
pub fn spawn_all(ctx: &NodeContext) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        tokio::spawn(consensus::run(ctx.clone())),
        tokio::spawn(core::run(ctx.clone())),
        tokio::spawn(peer::run(ctx.clone())),
        tokio::spawn(message::run(ctx.clone())),
    ]
}
