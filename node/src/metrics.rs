//! Prometheus-backed node metrics.
//!
//! A [`NodeMetrics`] owns the registry and strongly-typed gauges the
//! worker loops update. The gateway serves the text exposition at
//! `GET /metrics`.

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Registry plus the node gauges, shareable behind an `Arc`.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,

    /// Latest incorporated block number.
    pub block_height: IntGauge,
    /// Linked peers.
    pub peers: IntGauge,
    /// Mempool entries.
    pub transaction_pool_size: IntGauge,
    /// Agreement with the block-hash majority, in percent.
    pub block_hash_agreement: Gauge,
    /// Blocks incorporated by this process.
    pub blocks_incorporated: IntCounter,
    /// Blocks skipped by verification.
    pub blocks_rejected: IntCounter,
    /// Rollbacks performed.
    pub rollbacks: IntCounter,
    /// Wall time of a full block production, in seconds.
    pub block_production_seconds: Histogram,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("nado".to_string()), None)?;

        let block_height = IntGauge::with_opts(Opts::new(
            "block_height",
            "Latest incorporated block number",
        ))?;
        registry.register(Box::new(block_height.clone()))?;

        let peers = IntGauge::with_opts(Opts::new("peers", "Linked peers"))?;
        registry.register(Box::new(peers.clone()))?;

        let transaction_pool_size = IntGauge::with_opts(Opts::new(
            "transaction_pool_size",
            "Transactions in the mempool",
        ))?;
        registry.register(Box::new(transaction_pool_size.clone()))?;

        let block_hash_agreement = Gauge::with_opts(Opts::new(
            "block_hash_agreement",
            "Agreement with the block hash majority (percent)",
        ))?;
        registry.register(Box::new(block_hash_agreement.clone()))?;

        let blocks_incorporated = IntCounter::with_opts(Opts::new(
            "blocks_incorporated",
            "Blocks incorporated by this process",
        ))?;
        registry.register(Box::new(blocks_incorporated.clone()))?;

        let blocks_rejected = IntCounter::with_opts(Opts::new(
            "blocks_rejected",
            "Blocks skipped by verification",
        ))?;
        registry.register(Box::new(blocks_rejected.clone()))?;

        let rollbacks =
            IntCounter::with_opts(Opts::new("rollbacks", "Rollbacks performed"))?;
        registry.register(Box::new(rollbacks.clone()))?;

        let block_production_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "block_production_seconds",
                "Wall time of one block production in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0]),
        )?;
        registry.register(Box::new(block_production_seconds.clone()))?;

        Ok(NodeMetrics {
            registry,
            block_height,
            peers,
            transaction_pool_size,
            block_hash_agreement,
            blocks_incorporated,
            blocks_rejected,
            rollbacks,
            block_production_seconds,
        })
    }

    /// Encodes the registry in the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("failed to encode metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_register_and_render() {
        let metrics = NodeMetrics::new().expect("create metrics");
        metrics.block_height.set(42);
        metrics.blocks_incorporated.inc();
        metrics.block_production_seconds.observe(0.2);

        let text = metrics.gather_text();
        assert!(text.contains("nado_block_height"));
        assert!(text.contains("nado_blocks_incorporated"));
    }
}
