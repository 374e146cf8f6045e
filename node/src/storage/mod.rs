//! Storage engines of the node.
//!
//! Four owners split the durable state:
//!
//! - [`blocks::BlockStore`] — content-addressed block files, the number
//!   index and the latest/earliest pointers,
//! - [`accounts::AccountStore`] — balances, burn/production counters and
//!   the totals singleton,
//! - [`txindex::TxIndex`] — txid lookups and account range scans,
//! - [`peers::PeerStore`] — the per-IP peer registry and producer sets,
//!
//! all sharing one RocksDB handle ([`db::Db`]) for the indexed tables.

pub mod accounts;
pub mod blocks;
pub mod db;
pub mod peers;
pub mod txindex;

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

pub use accounts::AccountStore;
pub use blocks::{BlockEnds, BlockStore};
pub use db::{Db, retry_forever};
pub use peers::{PeerStore, ProducerSet, check_ip};
pub use txindex::{TxIndex, TxLocation};

/// All storage engines of one node, rooted at its home directory.
pub struct Stores {
    pub db: Arc<Db>,
    pub blocks: BlockStore,
    pub accounts: AccountStore,
    pub transactions: TxIndex,
    pub peers: PeerStore,
}

impl Stores {
    /// Opens every engine under `home`.
    ///
    /// `legacy_fee_height` parameterizes the account engine's compat gate.
    pub fn open(home: &Path, legacy_fee_height: u64) -> Result<Self> {
        let db = Db::open(&home.join("index").join("db"))?;
        Ok(Stores {
            blocks: BlockStore::new(home, db.clone()),
            accounts: AccountStore::new(db.clone(), legacy_fee_height),
            transactions: TxIndex::new(db.clone()),
            peers: PeerStore::new(home),
            db,
        })
    }
}
