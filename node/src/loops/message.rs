//! Message loop: periodic health summary and metric refresh.
//!
//! Observability only; owns no state. Every ten seconds it logs the shape
//! of the node and pushes the gauges the gateway exports.

use std::time::Duration;

use crate::context::NodeContext;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

async fn all_fine(ctx: &NodeContext) -> bool {
    let memserver = ctx.memserver.lock().await;
    let consensus = ctx.consensus.lock().await;

    if memserver.peers.len() < 10 {
        return false;
    }
    if Some(memserver.latest_block.block_hash.as_str())
        != consensus.majority_block_hash.as_deref()
    {
        return false;
    }
    if memserver.since_last_block > memserver.block_time {
        return false;
    }
    memserver.can_mine
}

async fn report(ctx: &NodeContext) {
    let fine = all_fine(ctx).await;

    let memserver = ctx.memserver.lock().await;
    let consensus = ctx.consensus.lock().await;

    tracing::info!("periods: {:?}", memserver.periods);
    tracing::info!(
        "block hash agreement: {}%",
        consensus.block_hash_pool_percentage as i64
    );
    tracing::info!(
        "transaction hash agreement: {}%",
        consensus.transaction_hash_pool_percentage as i64
    );
    tracing::info!(
        "block producer agreement: {}%",
        consensus.block_producers_hash_pool_percentage as i64
    );
    tracing::debug!(
        "transactions: {}tp/{}tb/{}ub",
        memserver.transaction_pool.len(),
        memserver.tx_buffer.len(),
        memserver.user_tx_buffer.len()
    );
    tracing::debug!("linked peers: {}", memserver.peers.len());
    tracing::debug!("block producers: {}", memserver.block_producers.len());
    tracing::warn!("emergency mode: {}", memserver.emergency_mode);
    tracing::warn!(
        "current block: {} / {}",
        memserver.latest_block.block_number,
        memserver.latest_block.block_hash
    );
    tracing::warn!("seconds since last block: {}", memserver.since_last_block);
    tracing::warn!("unreachable: {}", memserver.unreachable.len());
    tracing::warn!("forced sync: {:?}", memserver.force_sync_ip);

    if fine {
        tracing::info!("=== NODE IS OK! ===");
    }

    tracing::info!(
        "loop durations: core: {}; consensus: {}; peers: {}",
        memserver.core_duration,
        consensus.duration,
        memserver.peer_duration
    );

    ctx.metrics
        .block_height
        .set(memserver.latest_block.block_number as i64);
    ctx.metrics.peers.set(memserver.peers.len() as i64);
    ctx.metrics
        .transaction_pool_size
        .set(memserver.transaction_pool.len() as i64);
    ctx.metrics
        .block_hash_agreement
        .set(consensus.block_hash_pool_percentage);
}

/// Entry point of the message worker.
pub async fn run(ctx: NodeContext) {
    tracing::info!("starting message client");

    while !ctx.terminating() {
        report(&ctx).await;
        tokio::time::sleep(REPORT_INTERVAL).await;
    }
    tracing::info!("message loop terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::gossip::GossipClient;
    use crate::keys::generate_keys;
    use crate::memserver::MemServer;
    use crate::metrics::NodeMetrics;
    use crate::storage::Stores;
    use crate::types::Block;
    use tempfile::TempDir;

    #[tokio::test]
    async fn gauges_follow_the_memserver() {
        let tmp = TempDir::new().expect("create temp dir");
        std::fs::create_dir_all(tmp.path().join("blocks")).unwrap();
        std::fs::create_dir_all(tmp.path().join("index")).unwrap();
        std::fs::create_dir_all(tmp.path().join("peers")).unwrap();
        let stores = Stores::open(tmp.path(), 0).expect("open stores");

        let mut genesis = Block::genesis("ndocreator", "203.0.113.7", 1_669_852_800);
        genesis.block_number = 7;
        let earliest = genesis.block_hash.clone();
        let memserver = MemServer::new(
            NodeConfig::template("203.0.113.7"),
            generate_keys(),
            genesis,
            earliest,
            Vec::new(),
        );

        let ctx = NodeContext::new(
            memserver,
            stores,
            GossipClient::new(9173).unwrap(),
            NodeMetrics::new().unwrap(),
            tmp.path().to_path_buf(),
        );

        report(&ctx).await;
        assert!(ctx.metrics.gather_text().contains("nado_block_height 7"));
    }
}
