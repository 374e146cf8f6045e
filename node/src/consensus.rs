//! Consensus state: hash pools, majorities and trust.
//!
//! Every second the consensus loop projects the status pool into three
//! hash pools (latest block, transaction pool, producer set), computes the
//! majority and agreement percentage of each, and pays trust: agreeing
//! with a majority earns 3000, disagreeing costs 100. Trust is cached here
//! and periodically written back to the peer registry.

use std::collections::HashMap;

use crate::storage::PeerStore;
use crate::types::StatusReport;

/// Trust delta for agreeing with a majority.
pub const TRUST_REWARD: i64 = 3000;

/// Trust delta for disagreeing with a majority.
pub const TRUST_PENALTY: i64 = -100;

/// Hash opinions per peer; `None` marks an empty-pool report.
pub type HashPool = HashMap<String, Option<String>>;

/// Mode of a pool; disqualified entirely when any peer reports `None`.
pub fn get_majority(pool: &HashPool) -> Option<String> {
    if pool.is_empty() || pool.values().any(Option::is_none) {
        return None;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in pool.values().flatten() {
        *counts.entry(value.as_str()).or_default() += 1;
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(value, _)| value.to_string())
}

/// Share of the pool agreeing with `value`, in percent.
///
/// An empty or disqualified pool counts as full agreement so a lone node
/// does not see itself as a minority.
pub fn get_percentage(value: Option<&str>, pool: &HashPool) -> f64 {
    if pool.is_empty() || pool.values().any(Option::is_none) {
        return 100.0;
    }
    let Some(value) = value else {
        return 0.0;
    };
    let part = pool
        .values()
        .flatten()
        .filter(|candidate| candidate.as_str() == value)
        .count();
    100.0 * part as f64 / pool.len() as f64
}

/// Median of an integer collection.
pub fn get_median(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2)
    }
}

/// State owned by the consensus loop.
pub struct Consensus {
    /// ip -> reported latest block hash.
    pub block_hash_pool: HashPool,
    /// ip -> reported transaction pool hash.
    pub transaction_hash_pool: HashPool,
    /// ip -> reported producer set hash.
    pub block_producers_hash_pool: HashPool,
    /// ip -> full status report, refreshed by the peer loop.
    pub status_pool: HashMap<String, StatusReport>,
    /// In-memory trust cache; the registry holds the durable copy.
    pub trust_pool: HashMap<String, i64>,

    pub majority_block_hash: Option<String>,
    pub majority_transaction_pool_hash: Option<String>,
    pub majority_block_producers_hash: Option<String>,

    pub trust_median: Option<i64>,

    pub block_hash_pool_percentage: f64,
    pub transaction_hash_pool_percentage: f64,
    pub block_producers_hash_pool_percentage: f64,

    /// Duration of the last loop cycle, for observability.
    pub duration: u64,
}

impl Default for Consensus {
    fn default() -> Self {
        Self::new()
    }
}

impl Consensus {
    pub fn new() -> Self {
        Consensus {
            block_hash_pool: HashMap::new(),
            transaction_hash_pool: HashMap::new(),
            block_producers_hash_pool: HashMap::new(),
            status_pool: HashMap::new(),
            trust_pool: HashMap::new(),
            majority_block_hash: None,
            majority_transaction_pool_hash: None,
            majority_block_producers_hash: None,
            trust_median: None,
            block_hash_pool_percentage: 0.0,
            transaction_hash_pool_percentage: 0.0,
            block_producers_hash_pool_percentage: 0.0,
            duration: 0,
        }
    }

    /// Adjusts a peer's cached trust; unknown peers are ignored.
    pub fn change_trust(&mut self, peer: &str, value: i64) {
        if let Some(trust) = self.trust_pool.get_mut(peer) {
            *trust += value;
        }
    }

    /// Seeds the trust cache from the registry for newly-linked peers.
    pub fn add_peers_to_trust_pool(&mut self, peers: &[String], registry: &PeerStore) {
        for peer in peers {
            if self.trust_pool.contains_key(peer) {
                continue;
            }
            if let Some(trust) = registry.load_trust(peer) {
                self.trust_pool.insert(peer.clone(), trust);
            }
        }
    }

    /// Pays out one consensus round for a pool against its majority.
    pub fn reward_pool_consensus(&mut self, pool_name: PoolName) {
        let (pool, majority) = match pool_name {
            PoolName::BlockHash => (&self.block_hash_pool, &self.majority_block_hash),
            PoolName::TransactionHash => (
                &self.transaction_hash_pool,
                &self.majority_transaction_pool_hash,
            ),
            PoolName::BlockProducersHash => (
                &self.block_producers_hash_pool,
                &self.majority_block_producers_hash,
            ),
        };
        let Some(majority) = majority.clone() else {
            return;
        };

        let verdicts: Vec<(String, bool)> = self
            .trust_pool
            .keys()
            .filter_map(|peer| {
                let value = pool.get(peer)?;
                Some((peer.clone(), value.as_deref() == Some(majority.as_str())))
            })
            .collect();

        for (peer, agreed) in verdicts {
            let delta = if agreed { TRUST_REWARD } else { TRUST_PENALTY };
            self.change_trust(&peer, delta);
        }
    }

    /// Re-derives the hash pools, majorities and percentages from the
    /// status pool.
    pub fn refresh_hashes(&mut self) {
        self.block_hash_pool = self
            .status_pool
            .iter()
            .map(|(ip, status)| (ip.clone(), Some(status.latest_block_hash.clone())))
            .collect();
        self.transaction_hash_pool = self
            .status_pool
            .iter()
            .map(|(ip, status)| (ip.clone(), status.transaction_pool_hash.clone()))
            .collect();
        self.block_producers_hash_pool = self
            .status_pool
            .iter()
            .map(|(ip, status)| (ip.clone(), status.block_producers_hash.clone()))
            .collect();

        self.majority_block_hash = get_majority(&self.block_hash_pool);
        self.majority_transaction_pool_hash = get_majority(&self.transaction_hash_pool);
        self.majority_block_producers_hash = get_majority(&self.block_producers_hash_pool);

        self.block_hash_pool_percentage = get_percentage(
            self.majority_block_hash.as_deref(),
            &self.block_hash_pool,
        );
        self.transaction_hash_pool_percentage = get_percentage(
            self.majority_transaction_pool_hash.as_deref(),
            &self.transaction_hash_pool,
        );
        self.block_producers_hash_pool_percentage = get_percentage(
            self.majority_block_producers_hash.as_deref(),
            &self.block_producers_hash_pool,
        );
    }

    /// Recomputes the trust median used by the sync qualifier.
    pub fn update_trust_median(&mut self) {
        let values: Vec<i64> = self.trust_pool.values().copied().collect();
        self.trust_median = get_median(&values);
    }

    /// Drops a purged peer from every pool.
    pub fn forget_peer(&mut self, peer: &str) {
        self.status_pool.remove(peer);
        self.block_hash_pool.remove(peer);
        self.transaction_hash_pool.remove(peer);
        self.block_producers_hash_pool.remove(peer);
    }
}

/// Selector for [`Consensus::reward_pool_consensus`].
#[derive(Clone, Copy, Debug)]
pub enum PoolName {
    BlockHash,
    TransactionHash,
    BlockProducersHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_status(latest: &str, tx_hash: Option<&str>) -> StatusReport {
        StatusReport {
            reported_uptime: 100,
            address: "ndoabc".to_string(),
            transaction_pool_hash: tx_hash.map(str::to_string),
            block_producers_hash: Some("producers".to_string()),
            latest_block_hash: latest.to_string(),
            earliest_block_hash: "genesis".to_string(),
            protocol: 3,
            version: "0.1.0".to_string(),
        }
    }

    fn pool_of(pairs: &[(&str, Option<&str>)]) -> HashPool {
        pairs
            .iter()
            .map(|(ip, value)| (ip.to_string(), value.map(str::to_string)))
            .collect()
    }

    #[test]
    fn majority_is_the_mode() {
        let pool = pool_of(&[
            ("1.1.1.1", Some("h1")),
            ("2.2.2.2", Some("h1")),
            ("3.3.3.3", Some("h2")),
        ]);
        assert_eq!(get_majority(&pool).as_deref(), Some("h1"));
    }

    #[test]
    fn any_none_disqualifies_the_pool() {
        let pool = pool_of(&[("1.1.1.1", Some("h1")), ("2.2.2.2", None)]);
        assert_eq!(get_majority(&pool), None);
        assert_eq!(get_percentage(Some("h1"), &pool), 100.0);
    }

    #[test]
    fn unanimous_supermajority_clears_two_thirds() {
        // Everyone reports h for several refreshes: the majority must be h
        // with agreement well above the two-thirds threshold.
        let mut consensus = Consensus::new();
        for round in 0..3 {
            for ip in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
                consensus
                    .status_pool
                    .insert(ip.to_string(), dummy_status("h", Some("t")));
            }
            consensus.refresh_hashes();
            assert_eq!(
                consensus.majority_block_hash.as_deref(),
                Some("h"),
                "round {round}"
            );
            assert!(consensus.block_hash_pool_percentage >= 66.0);
        }
    }

    #[test]
    fn trust_rewards_majority_and_penalizes_minority() {
        let mut consensus = Consensus::new();
        consensus.trust_pool.insert("1.1.1.1".to_string(), 0);
        consensus.trust_pool.insert("2.2.2.2".to_string(), 0);
        consensus.trust_pool.insert("3.3.3.3".to_string(), 0);

        consensus
            .status_pool
            .insert("1.1.1.1".to_string(), dummy_status("h1", Some("t")));
        consensus
            .status_pool
            .insert("2.2.2.2".to_string(), dummy_status("h1", Some("t")));
        consensus
            .status_pool
            .insert("3.3.3.3".to_string(), dummy_status("h2", Some("t")));

        consensus.refresh_hashes();
        consensus.reward_pool_consensus(PoolName::BlockHash);

        assert_eq!(consensus.trust_pool["1.1.1.1"], TRUST_REWARD);
        assert_eq!(consensus.trust_pool["2.2.2.2"], TRUST_REWARD);
        assert_eq!(consensus.trust_pool["3.3.3.3"], TRUST_PENALTY);
    }

    #[test]
    fn median_handles_both_parities() {
        assert_eq!(get_median(&[]), None);
        assert_eq!(get_median(&[5]), Some(5));
        assert_eq!(get_median(&[1, 100, 3]), Some(3));
        assert_eq!(get_median(&[1, 3, 5, 100]), Some(4));
    }

    #[test]
    fn forget_peer_clears_every_pool() {
        let mut consensus = Consensus::new();
        consensus
            .status_pool
            .insert("1.1.1.1".to_string(), dummy_status("h", Some("t")));
        consensus.refresh_hashes();
        assert!(consensus.block_hash_pool.contains_key("1.1.1.1"));

        consensus.forget_peer("1.1.1.1");
        assert!(consensus.status_pool.is_empty());
        assert!(consensus.block_hash_pool.is_empty());
    }
}
