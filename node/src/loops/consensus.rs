//! Consensus loop: trust payouts and derived-hash refresh.
//!
//! Once a second: seed newly-linked peers into the trust cache, recompute
//! the trust median, pay one consensus round for the block and transaction
//! pools, recompute our own pool hashes and re-derive the majority state
//! from the status pool.

use std::time::Duration;

use crate::config::get_timestamp_seconds;
use crate::consensus::PoolName;
use crate::context::NodeContext;

async fn cycle(ctx: &NodeContext) {
    let mut memserver = ctx.memserver.lock().await;
    let mut consensus = ctx.consensus.lock().await;

    let peers = memserver.peers.clone();
    consensus.add_peers_to_trust_pool(&peers, &ctx.stores.peers);
    consensus.update_trust_median();

    consensus.reward_pool_consensus(PoolName::BlockHash);
    consensus.reward_pool_consensus(PoolName::TransactionHash);

    memserver.transaction_pool_hash = memserver.get_transaction_pool_hash();
    memserver.block_producers_hash = memserver.get_block_producers_hash();
    memserver.since_last_block =
        get_timestamp_seconds().saturating_sub(memserver.latest_block.block_timestamp);

    consensus.refresh_hashes();
}

/// Entry point of the consensus worker.
pub async fn run(ctx: NodeContext) {
    tracing::info!("starting consensus manager");

    while !ctx.terminating() {
        let start = get_timestamp_seconds();
        cycle(&ctx).await;
        {
            let mut consensus = ctx.consensus.lock().await;
            consensus.duration = get_timestamp_seconds() - start;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    tracing::info!("consensus loop terminated");
}
