//! Peer registry: one JSON file per peer, keyed by base64 of its IP.
//!
//! Trust lives here as the durable copy; the consensus loop keeps an
//! in-memory cache and dumps it back periodically. Producer sets are
//! persisted by their hash for historical lookup.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::get_timestamp_seconds;
use crate::error::{NodeError, Result};
use crate::hashing::{base64_encode, blake2b_hash};
use crate::types::PeerRecord;

/// A producer set frozen under its hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerSet {
    pub producer_set_hash: String,
    pub producer_set: Vec<String>,
}

/// File-backed peer registry.
pub struct PeerStore {
    home: PathBuf,
}

/// True for an IPv4 address we would gossip with: public-ish, not ours.
pub fn check_ip(ip: &str, own_ip: &str) -> bool {
    let Ok(parsed) = ip.parse::<Ipv4Addr>() else {
        return false;
    };
    if parsed.is_loopback() || parsed.is_unspecified() {
        return false;
    }
    ip != own_ip
}

impl PeerStore {
    pub fn new(home: &Path) -> Self {
        PeerStore {
            home: home.to_path_buf(),
        }
    }

    fn peers_dir(&self) -> PathBuf {
        self.home.join("peers")
    }

    fn peer_path(&self, ip: &str) -> PathBuf {
        self.peers_dir().join(format!("{}.dat", base64_encode(ip)))
    }

    fn producer_set_path(&self, hash: &str) -> PathBuf {
        self.home
            .join("index")
            .join("producer_sets")
            .join(format!("{hash}.dat"))
    }

    /// True when a record for `ip` exists on disk.
    pub fn ip_stored(&self, ip: &str) -> bool {
        self.peer_path(ip).exists()
    }

    /// Persists a peer record; existing records are kept unless
    /// `overwrite` is set.
    pub fn save_peer(&self, record: &PeerRecord, overwrite: bool) -> Result<()> {
        if !overwrite && self.ip_stored(&record.peer_ip) {
            return Ok(());
        }
        std::fs::write(
            self.peer_path(&record.peer_ip),
            serde_json::to_vec(record)?,
        )?;
        Ok(())
    }

    /// Loads a peer record, `None` when unknown.
    pub fn load_peer(&self, ip: &str) -> Option<PeerRecord> {
        let raw = std::fs::read_to_string(self.peer_path(ip)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Trust score of a stored peer.
    pub fn load_trust(&self, ip: &str) -> Option<i64> {
        self.load_peer(ip).map(|record| record.peer_trust)
    }

    /// Applies a closure to a stored record and stamps `last_seen`.
    pub fn update_peer(&self, ip: &str, apply: impl FnOnce(&mut PeerRecord)) -> Result<()> {
        let mut record = self
            .load_peer(ip)
            .ok_or_else(|| NodeError::TransientStorage(format!("peer {ip} not stored")))?;
        apply(&mut record);
        record.last_seen = Some(get_timestamp_seconds());
        std::fs::write(self.peer_path(ip), serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Overwrites a peer's durable trust.
    pub fn update_trust(&self, ip: &str, trust: i64) -> Result<()> {
        self.update_peer(ip, |record| record.peer_trust = trust)
    }

    /// Removes a peer file.
    pub fn delete_peer(&self, ip: &str) -> Result<()> {
        let path = self.peer_path(ip);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// All stored records, unordered.
    pub fn list_stored(&self) -> Vec<PeerRecord> {
        let Ok(entries) = std::fs::read_dir(self.peers_dir()) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let raw = std::fs::read_to_string(entry.path()).ok()?;
                serde_json::from_str(&raw).ok()
            })
            .collect()
    }

    /// Stored peers sorted by trust, best first.
    pub fn list_by_trust(&self) -> Vec<PeerRecord> {
        let mut records = self.list_stored();
        records.sort_by(|a, b| b.peer_trust.cmp(&a.peer_trust));
        records
    }

    /// Writes the in-memory trust cache back to the registry.
    pub fn dump_trust(&self, trust_pool: &std::collections::HashMap<String, i64>) {
        for (ip, trust) in trust_pool {
            if let Err(e) = self.update_trust(ip, *trust) {
                tracing::debug!("could not persist trust of {ip}: {e}");
            }
        }
    }

    /// Freezes a producer set under its hash, first write wins.
    pub fn store_producer_set(&self, producer_set: &[String]) -> Result<String> {
        let mut sorted: Vec<String> = producer_set.to_vec();
        sorted.sort();
        sorted.dedup();

        let hash = blake2b_hash(&sorted);
        let path = self.producer_set_path(&hash);
        if !path.exists() {
            let frozen = ProducerSet {
                producer_set_hash: hash.clone(),
                producer_set: sorted,
            };
            std::fs::write(path, serde_json::to_vec(&frozen)?)?;
        }
        Ok(hash)
    }

    /// Looks up a frozen producer set by hash.
    pub fn get_producer_set(&self, hash: &str) -> Option<ProducerSet> {
        let raw = std::fs::read_to_string(self.producer_set_path(hash)).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, PeerStore) {
        let tmp = TempDir::new().expect("create temp dir");
        std::fs::create_dir_all(tmp.path().join("peers")).unwrap();
        std::fs::create_dir_all(tmp.path().join("index").join("producer_sets")).unwrap();
        let peer_store = PeerStore::new(tmp.path());
        (tmp, peer_store)
    }

    #[test]
    fn save_load_update_delete() {
        let (_tmp, peers) = store();
        let record = PeerRecord::new("203.0.113.7", 9173, "ndoabc");

        peers.save_peer(&record, false).expect("save");
        assert!(peers.ip_stored("203.0.113.7"));
        assert_eq!(peers.load_peer("203.0.113.7").unwrap(), record);

        peers.update_trust("203.0.113.7", 4000).expect("update");
        let updated = peers.load_peer("203.0.113.7").unwrap();
        assert_eq!(updated.peer_trust, 4000);
        assert!(updated.last_seen.is_some());

        peers.delete_peer("203.0.113.7").expect("delete");
        assert!(!peers.ip_stored("203.0.113.7"));
    }

    #[test]
    fn save_without_overwrite_keeps_existing() {
        let (_tmp, peers) = store();
        let original = PeerRecord::new("203.0.113.7", 9173, "ndoabc");
        peers.save_peer(&original, false).expect("save");

        let mut replacement = original.clone();
        replacement.peer_trust = 99_999;
        peers.save_peer(&replacement, false).expect("no-op save");
        assert_eq!(peers.load_trust("203.0.113.7"), Some(original.peer_trust));

        peers.save_peer(&replacement, true).expect("overwrite");
        assert_eq!(peers.load_trust("203.0.113.7"), Some(99_999));
    }

    #[test]
    fn trust_ordering_is_descending() {
        let (_tmp, peers) = store();
        for (ip, trust) in [("203.0.113.1", 10), ("203.0.113.2", 5000), ("203.0.113.3", -100)] {
            let mut record = PeerRecord::new(ip, 9173, "ndoabc");
            record.peer_trust = trust;
            peers.save_peer(&record, true).expect("save");
        }

        let sorted = peers.list_by_trust();
        let trusts: Vec<i64> = sorted.iter().map(|r| r.peer_trust).collect();
        assert_eq!(trusts, vec![5000, 10, -100]);
    }

    #[test]
    fn producer_set_is_content_addressed() {
        let (_tmp, peers) = store();
        let unsorted = vec!["203.0.113.9".to_string(), "203.0.113.7".to_string()];
        let hash = peers.store_producer_set(&unsorted).expect("store");

        let frozen = peers.get_producer_set(&hash).expect("load");
        assert_eq!(frozen.producer_set_hash, hash);
        // Stored sorted, so permutations map to the same hash.
        assert_eq!(
            frozen.producer_set,
            vec!["203.0.113.7".to_string(), "203.0.113.9".to_string()]
        );

        let rehash = peers
            .store_producer_set(&["203.0.113.7".to_string(), "203.0.113.9".to_string()])
            .expect("store again");
        assert_eq!(rehash, hash);
    }

    #[test]
    fn ip_validity_rules() {
        assert!(check_ip("203.0.113.7", "198.51.100.1"));
        assert!(!check_ip("127.0.0.1", "198.51.100.1"));
        assert!(!check_ip("0.0.0.0", "198.51.100.1"));
        assert!(!check_ip("198.51.100.1", "198.51.100.1"));
        assert!(!check_ip("not-an-ip", "198.51.100.1"));
        assert!(!check_ip("::1", "198.51.100.1"));
    }
}
