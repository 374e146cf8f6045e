//! Sync source selection.
//!
//! When the node is a minority it must pick a peer to copy state from.
//! The cascade walks majority hashes from the strongest downwards (bounded
//! by the cascade limit) and returns the first peer that both reports the
//! cascaded hash and qualifies on trust and protocol. If nobody qualifies,
//! the first peer observed with any cascaded hash is the fallback: converge
//! toward the strongest majority we can trust, settle for merely popular.

use std::collections::HashMap;

use rand::seq::SliceRandom;

use crate::consensus::{Consensus, HashPool};
use crate::memserver::MemServer;
use crate::storage::PeerStore;

/// Verdict of the per-peer sync gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifyOutcome {
    pub ok: bool,
    pub reason: Option<&'static str>,
}

impl QualifyOutcome {
    fn pass() -> Self {
        QualifyOutcome {
            ok: true,
            reason: None,
        }
    }

    fn fail(reason: &'static str) -> Self {
        QualifyOutcome {
            ok: false,
            reason: Some(reason),
        }
    }
}

/// Gate for using `peer` as a sync source.
#[allow(clippy::too_many_arguments)]
pub fn qualifies_to_sync(
    peer: &str,
    peer_trust: i64,
    peer_protocol: u32,
    local_protocol: u32,
    trust_median: Option<i64>,
    unreachable: &HashMap<String, u64>,
    peer_hash: Option<&str>,
    required_hash: &str,
    promiscuous: bool,
) -> QualifyOutcome {
    if !promiscuous {
        if let Some(median) = trust_median {
            if peer_trust < median {
                return QualifyOutcome::fail("peer trust below median");
            }
        }
    }
    if unreachable.contains_key(peer) {
        return QualifyOutcome::fail("peer unreachable");
    }
    if peer_protocol < local_protocol {
        return QualifyOutcome::fail("peer protocol too low");
    }
    if peer_hash != Some(required_hash) {
        return QualifyOutcome::fail("peer hash not in cascaded majority");
    }
    QualifyOutcome::pass()
}

/// Distinct pool values ordered by descending occurrence.
pub fn sort_occurrence(pool: &HashPool) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = {
        let mut tally: HashMap<&str, usize> = HashMap::new();
        for value in pool.values().flatten() {
            *tally.entry(value.as_str()).or_default() += 1;
        }
        tally
            .into_iter()
            .map(|(value, count)| (value.to_string(), count))
            .collect()
    };
    // Occurrence first; value as a deterministic tiebreak.
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.into_iter().map(|(value, _)| value).collect()
}

/// Picks a peer to synchronize a pool from; see module docs.
///
/// Records the reached cascade depth in the MemServer. Returns `None` when
/// the pool holds no usable candidate at all.
pub fn get_peer_to_sync_from(
    memserver: &mut MemServer,
    consensus: &Consensus,
    registry: &PeerStore,
    source_pool: &HashPool,
) -> Option<String> {
    if let Some(forced) = memserver.force_sync_ip.clone() {
        return Some(forced);
    }

    let sorted_hashes: Vec<String> = sort_occurrence(source_pool)
        .into_iter()
        .take(memserver.config.cascade_limit)
        .collect();

    let mut shuffled: Vec<(String, Option<String>)> = source_pool
        .iter()
        .filter(|(peer, _)| peer.as_str() != memserver.config.ip)
        .map(|(peer, value)| (peer.clone(), value.clone()))
        .collect();
    shuffled.shuffle(&mut rand::thread_rng());

    let mut first_peer: Option<String> = None;
    memserver.cascade_depth = 0;

    for (depth, hash_candidate) in sorted_hashes.iter().enumerate() {
        memserver.cascade_depth = depth + 1;

        for (peer, value) in &shuffled {
            // The fallback must still be reachable.
            if first_peer.is_none()
                && value.as_deref() == Some(hash_candidate.as_str())
                && !memserver.unreachable.contains_key(peer)
            {
                first_peer = Some(peer.clone());
            }

            let peer_trust = registry.load_trust(peer).unwrap_or(0);
            let peer_protocol = consensus
                .status_pool
                .get(peer)
                .map(|status| status.protocol)
                .unwrap_or(0);

            let verdict = qualifies_to_sync(
                peer,
                peer_trust,
                peer_protocol,
                memserver.config.protocol,
                consensus.trust_median,
                &memserver.unreachable,
                value.as_deref(),
                hash_candidate,
                memserver.config.promiscuous,
            );
            if verdict.ok {
                return Some(peer.clone());
            }
        }
    }

    tracing::info!(
        "ran out of options when picking a trusted hash, using the first tested {first_peer:?}"
    );
    first_peer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::keys::generate_keys;
    use crate::types::{Block, PeerRecord, StatusReport};
    use tempfile::TempDir;

    fn memserver_with(config: NodeConfig) -> MemServer {
        let genesis = Block::genesis("ndocreator", "203.0.113.99", 1_669_852_800);
        let earliest = genesis.block_hash.clone();
        MemServer::new(config, generate_keys(), genesis, earliest, Vec::new())
    }

    fn dummy_status(protocol: u32) -> StatusReport {
        StatusReport {
            reported_uptime: 5,
            address: "ndoabc".to_string(),
            transaction_pool_hash: None,
            block_producers_hash: None,
            latest_block_hash: "whatever".to_string(),
            earliest_block_hash: "genesis".to_string(),
            protocol,
            version: "0.1.0".to_string(),
        }
    }

    struct CascadeFixture {
        _tmp: TempDir,
        registry: PeerStore,
        consensus: Consensus,
        pool: HashPool,
    }

    /// Three peers reporting hashes [h1, h1, h2] with trust [100, -100, 50].
    fn cascade_fixture() -> CascadeFixture {
        let tmp = TempDir::new().expect("create temp dir");
        std::fs::create_dir_all(tmp.path().join("peers")).unwrap();
        let registry = PeerStore::new(tmp.path());

        let mut consensus = Consensus::new();
        let mut pool = HashPool::new();
        for (ip, hash, trust) in [
            ("203.0.113.1", "h1", 100),
            ("203.0.113.2", "h1", -100),
            ("203.0.113.3", "h2", 50),
        ] {
            let mut record = PeerRecord::new(ip, 9173, "ndoabc");
            record.peer_trust = trust;
            registry.save_peer(&record, true).unwrap();
            consensus.status_pool.insert(ip.to_string(), dummy_status(3));
            pool.insert(ip.to_string(), Some(hash.to_string()));
        }
        consensus.trust_median = Some(50);

        CascadeFixture {
            _tmp: tmp,
            registry,
            consensus,
            pool,
        }
    }

    #[test]
    fn qualify_gate_reports_each_reason() {
        let unreachable = HashMap::new();

        let ok = qualifies_to_sync("p", 100, 3, 3, Some(50), &unreachable, Some("h"), "h", false);
        assert!(ok.ok);

        let low_trust =
            qualifies_to_sync("p", 10, 3, 3, Some(50), &unreachable, Some("h"), "h", false);
        assert_eq!(low_trust.reason, Some("peer trust below median"));

        // Promiscuous mode waives the trust check.
        let waived =
            qualifies_to_sync("p", 10, 3, 3, Some(50), &unreachable, Some("h"), "h", true);
        assert!(waived.ok);

        let mut banned = HashMap::new();
        banned.insert("p".to_string(), 123u64);
        let unreachable_fail =
            qualifies_to_sync("p", 100, 3, 3, Some(50), &banned, Some("h"), "h", false);
        assert_eq!(unreachable_fail.reason, Some("peer unreachable"));

        let old_protocol =
            qualifies_to_sync("p", 100, 2, 3, Some(50), &unreachable, Some("h"), "h", false);
        assert_eq!(old_protocol.reason, Some("peer protocol too low"));

        let wrong_hash =
            qualifies_to_sync("p", 100, 3, 3, Some(50), &unreachable, Some("x"), "h", false);
        assert_eq!(wrong_hash.reason, Some("peer hash not in cascaded majority"));
    }

    #[test]
    fn occurrence_sort_puts_the_strongest_hash_first() {
        let fx = cascade_fixture();
        let sorted = sort_occurrence(&fx.pool);
        assert_eq!(sorted, vec!["h1".to_string(), "h2".to_string()]);
    }

    #[test]
    fn cascade_returns_a_trusted_majority_reporter() {
        let fx = cascade_fixture();
        let mut config = NodeConfig::template("203.0.113.99");
        config.cascade_limit = 1;
        let mut mem = memserver_with(config);

        // Only 203.0.113.1 reports h1 with trust >= median.
        let picked =
            get_peer_to_sync_from(&mut mem, &fx.consensus, &fx.registry, &fx.pool).unwrap();
        assert_eq!(picked, "203.0.113.1");
        assert_eq!(mem.cascade_depth, 1);
    }

    #[test]
    fn promiscuous_accepts_any_majority_reporter() {
        let fx = cascade_fixture();
        let mut config = NodeConfig::template("203.0.113.99");
        config.cascade_limit = 1;
        config.promiscuous = true;
        let mut mem = memserver_with(config);

        for _ in 0..8 {
            let picked =
                get_peer_to_sync_from(&mut mem, &fx.consensus, &fx.registry, &fx.pool).unwrap();
            assert!(picked == "203.0.113.1" || picked == "203.0.113.2");
        }
    }

    #[test]
    fn wider_cascade_may_fall_through_to_the_second_hash() {
        let mut fx = cascade_fixture();
        // Push the median above every h1 reporter so the first hash has no
        // qualified candidates at all.
        fx.consensus.trust_median = Some(500);
        let mut record = PeerRecord::new("203.0.113.3", 9173, "ndoabc");
        record.peer_trust = 600;
        fx.registry.save_peer(&record, true).unwrap();

        let mut config = NodeConfig::template("203.0.113.99");
        config.cascade_limit = 2;
        let mut mem = memserver_with(config);

        let picked =
            get_peer_to_sync_from(&mut mem, &fx.consensus, &fx.registry, &fx.pool).unwrap();
        assert_eq!(picked, "203.0.113.3");
        assert_eq!(mem.cascade_depth, 2);
    }

    #[test]
    fn exhausted_cascade_falls_back_to_first_observed_reporter() {
        let mut fx = cascade_fixture();
        fx.consensus.trust_median = Some(10_000);

        let mut config = NodeConfig::template("203.0.113.99");
        config.cascade_limit = 2;
        let mut mem = memserver_with(config);

        // Nobody qualifies; the fallback is some reporter of a cascaded
        // hash, never None.
        let picked = get_peer_to_sync_from(&mut mem, &fx.consensus, &fx.registry, &fx.pool);
        assert!(picked.is_some());
    }

    #[test]
    fn force_sync_pins_the_source() {
        let fx = cascade_fixture();
        let mut mem = memserver_with(NodeConfig::template("203.0.113.99"));
        mem.force_sync_ip = Some("203.0.113.200".to_string());

        let picked = get_peer_to_sync_from(&mut mem, &fx.consensus, &fx.registry, &fx.pool);
        assert_eq!(picked.as_deref(), Some("203.0.113.200"));
    }

    #[test]
    fn self_is_never_a_sync_source() {
        let fx = cascade_fixture();
        let mut config = NodeConfig::template("203.0.113.1");
        config.promiscuous = true;
        let mut mem = memserver_with(config);

        let mut own_pool = fx.pool.clone();
        own_pool.insert("203.0.113.1".to_string(), Some("h1".to_string()));

        for _ in 0..8 {
            let picked =
                get_peer_to_sync_from(&mut mem, &fx.consensus, &fx.registry, &own_pool).unwrap();
            assert_ne!(picked, "203.0.113.1");
        }
    }
}
