//! Indexed store over RocksDB.
//!
//! The four logical tables of the node live in dedicated column families:
//!
//! - `"block_index"`:  block number (big-endian u64) -> block hash,
//! - `"tx_index"`:     txid -> location (block number, sender, recipient),
//! - `"tx_by_block"`:  block number ++ txid -> location (range scans),
//! - `"acc_index"`:    address -> account row,
//! - `"totals_index"`: fixed key -> totals aggregate.
//!
//! Values are canonical MessagePack. Multi-key mutations go through a
//! write batch so concurrent readers never observe half a mutation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{NodeError, Result};

type RocksDb = DBWithThreadMode<MultiThreaded>;

pub const CF_BLOCK_INDEX: &str = "block_index";
pub const CF_TX_INDEX: &str = "tx_index";
pub const CF_TX_BY_BLOCK: &str = "tx_by_block";
pub const CF_ACCOUNTS: &str = "acc_index";
pub const CF_TOTALS: &str = "totals_index";

const ALL_CFS: [&str; 6] = [
    "default",
    CF_BLOCK_INDEX,
    CF_TX_INDEX,
    CF_TX_BY_BLOCK,
    CF_ACCOUNTS,
    CF_TOTALS,
];

/// A single mutation inside an atomic batch.
pub enum BatchOp {
    Put {
        cf: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: &'static str,
        key: Vec<u8>,
    },
}

/// Shared handle to the indexed store.
pub struct Db {
    db: RocksDb,
}

impl Db {
    /// Opens (or creates) the store under `path`, with all column families.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = RocksDb::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Arc::new(Db { db }))
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| NodeError::TransientStorage(format!("missing column family {name}")))
    }

    /// Encodes a value into its stored representation.
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Fetches and decodes a single value.
    pub fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf)?;
        match self.db.get_cf(&cf, key)? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// True when `key` is present in `cf`.
    pub fn contains(&self, cf: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf)?;
        Ok(self.db.get_cf(&cf, key)?.is_some())
    }

    /// Stores a single value.
    pub fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let handle = self.cf(cf)?;
        self.db.put_cf(&handle, key, Self::encode(value)?)?;
        Ok(())
    }

    /// Deletes a single key.
    pub fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        let handle = self.cf(cf)?;
        self.db.delete_cf(&handle, key)?;
        Ok(())
    }

    /// Applies a set of mutations atomically.
    pub fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { cf, key, value } => {
                    let handle = self.cf(cf)?;
                    batch.put_cf(&handle, key, value);
                }
                BatchOp::Delete { cf, key } => {
                    let handle = self.cf(cf)?;
                    batch.delete_cf(&handle, key);
                }
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Scans `[from, to)` in key order, decoding values.
    pub fn iter_range<T: DeserializeOwned>(
        &self,
        cf: &str,
        from: &[u8],
        to: &[u8],
    ) -> Result<Vec<(Vec<u8>, T)>> {
        let handle = self.cf(cf)?;
        let mode = rocksdb::IteratorMode::From(from, rocksdb::Direction::Forward);

        let mut collected = Vec::new();
        for entry in self.db.iterator_cf(&handle, mode) {
            let (key, value) = entry?;
            if key.as_ref() >= to {
                break;
            }
            collected.push((key.to_vec(), rmp_serde::from_slice(&value)?));
        }
        Ok(collected)
    }
}

/// Big-endian key for a block number, so numeric and lexicographic order
/// coincide.
pub fn block_number_key(number: u64) -> [u8; 8] {
    number.to_be_bytes()
}

/// Runs a storage operation until it succeeds, backing off one second
/// between attempts.
///
/// Reserved for the paths the protocol declares mandatory: block saves,
/// index writes during incorporation, rollback.
pub fn retry_forever<T>(what: &str, mut op: impl FnMut() -> Result<T>) -> T {
    loop {
        match op() {
            Ok(value) => return value,
            Err(e) => {
                tracing::error!("{what} failed, retrying: {e}");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_get_delete_roundtrip() {
        let tmp = TempDir::new().expect("create temp dir");
        let db = Db::open(tmp.path()).expect("open db");

        db.put(CF_ACCOUNTS, b"ndoabc", &42u64).expect("put");
        assert_eq!(db.get::<u64>(CF_ACCOUNTS, b"ndoabc").unwrap(), Some(42));
        assert!(db.contains(CF_ACCOUNTS, b"ndoabc").unwrap());

        db.delete(CF_ACCOUNTS, b"ndoabc").expect("delete");
        assert_eq!(db.get::<u64>(CF_ACCOUNTS, b"ndoabc").unwrap(), None);
    }

    #[test]
    fn batch_is_atomic_across_families() {
        let tmp = TempDir::new().expect("create temp dir");
        let db = Db::open(tmp.path()).expect("open db");

        db.apply_batch(vec![
            BatchOp::Put {
                cf: CF_TX_INDEX,
                key: b"tx1".to_vec(),
                value: Db::encode(&1u64).unwrap(),
            },
            BatchOp::Put {
                cf: CF_BLOCK_INDEX,
                key: block_number_key(1).to_vec(),
                value: Db::encode(&"hash1".to_string()).unwrap(),
            },
        ])
        .expect("batch");

        assert_eq!(db.get::<u64>(CF_TX_INDEX, b"tx1").unwrap(), Some(1));
        let hash: Option<String> = db.get(CF_BLOCK_INDEX, &block_number_key(1)).unwrap();
        assert_eq!(hash.as_deref(), Some("hash1"));
    }

    #[test]
    fn range_scan_respects_block_number_order() {
        let tmp = TempDir::new().expect("create temp dir");
        let db = Db::open(tmp.path()).expect("open db");

        for number in [1u64, 2, 3, 300] {
            let mut key = block_number_key(number).to_vec();
            key.extend_from_slice(b"txid");
            db.put(CF_TX_BY_BLOCK, &key, &number).expect("put");
        }

        let hits: Vec<(Vec<u8>, u64)> = db
            .iter_range(
                CF_TX_BY_BLOCK,
                &block_number_key(2),
                &block_number_key(300),
            )
            .expect("scan");

        let numbers: Vec<u64> = hits.into_iter().map(|(_, n)| n).collect();
        assert_eq!(numbers, vec![2, 3]);
    }
}
