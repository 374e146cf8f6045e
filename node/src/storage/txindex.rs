//! Transaction index: txid lookups and account range scans.
//!
//! Each indexed transaction is written under two keys: its txid (point
//! lookups) and `block_number ++ txid` (range scans for account history).
//! Index and unindex mirror `reflect_transaction`, so account state and the
//! index always move together.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::types::{Block, Transaction};

use super::accounts::AccountStore;
use super::blocks::BlockStore;
use super::db::{BatchOp, CF_TX_BY_BLOCK, CF_TX_INDEX, Db, block_number_key};

/// Span of one account-history page.
pub const ACCOUNT_SCAN_SPAN: u64 = 100;

/// Where an indexed transaction lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    pub block_number: u64,
    pub sender: String,
    pub recipient: String,
}

/// Index over all incorporated transactions.
pub struct TxIndex {
    db: Arc<Db>,
}

fn by_block_key(block_number: u64, txid: &str) -> Vec<u8> {
    let mut key = block_number_key(block_number).to_vec();
    key.extend_from_slice(txid.as_bytes());
    key
}

impl TxIndex {
    pub fn new(db: Arc<Db>) -> Self {
        TxIndex { db }
    }

    /// True when the txid has never been indexed.
    pub fn validate_uniqueness(&self, txid: &str) -> Result<bool> {
        Ok(!self.db.contains(CF_TX_INDEX, txid.as_bytes())?)
    }

    /// Point lookup of a transaction's location.
    pub fn get_location(&self, txid: &str) -> Result<Option<TxLocation>> {
        self.db.get(CF_TX_INDEX, txid.as_bytes())
    }

    /// Resolves a txid to the full transaction through the block store.
    pub fn get_transaction(&self, txid: &str, blocks: &BlockStore) -> Option<Transaction> {
        let location = self.get_location(txid).ok().flatten()?;
        let block = blocks.get_block_by_number(location.block_number)?;
        block
            .block_transactions
            .into_iter()
            .find(|tx| tx.txid == txid)
    }

    /// Reflects and indexes a block's transactions as one logical step.
    ///
    /// If a reflect fails midway, the already-applied transactions are
    /// rolled back before the error propagates, so the account store never
    /// drifts from the index.
    pub fn index_transactions(
        &self,
        block: &Block,
        sorted_transactions: &[Transaction],
        accounts: &AccountStore,
    ) -> Result<()> {
        for (applied, transaction) in sorted_transactions.iter().enumerate() {
            if let Err(e) = accounts.reflect_transaction(transaction, block.block_number, false) {
                for done in sorted_transactions[..applied].iter().rev() {
                    let _ = accounts.reflect_transaction(done, block.block_number, true);
                }
                return Err(e);
            }
        }

        let mut ops = Vec::with_capacity(sorted_transactions.len() * 2);
        for transaction in sorted_transactions {
            let location = TxLocation {
                block_number: block.block_number,
                sender: transaction.sender.clone(),
                recipient: transaction.recipient.clone(),
            };
            let value = Db::encode(&location)?;
            ops.push(BatchOp::Put {
                cf: CF_TX_INDEX,
                key: transaction.txid.clone().into_bytes(),
                value: value.clone(),
            });
            ops.push(BatchOp::Put {
                cf: CF_TX_BY_BLOCK,
                key: by_block_key(block.block_number, &transaction.txid),
                value,
            });
        }
        self.db.apply_batch(ops)
    }

    /// Inverse of [`TxIndex::index_transactions`].
    pub fn unindex_transactions(&self, block: &Block, accounts: &AccountStore) -> Result<()> {
        for (reverted, transaction) in block.block_transactions.iter().enumerate() {
            if let Err(e) = accounts.reflect_transaction(transaction, block.block_number, true) {
                for done in block.block_transactions[..reverted].iter().rev() {
                    let _ = accounts.reflect_transaction(done, block.block_number, false);
                }
                return Err(e);
            }
        }

        let mut ops = Vec::with_capacity(block.block_transactions.len() * 2);
        for transaction in &block.block_transactions {
            ops.push(BatchOp::Delete {
                cf: CF_TX_INDEX,
                key: transaction.txid.clone().into_bytes(),
            });
            ops.push(BatchOp::Delete {
                cf: CF_TX_BY_BLOCK,
                key: by_block_key(block.block_number, &transaction.txid),
            });
        }
        self.db.apply_batch(ops)
    }

    /// Account history over `[min_block, min_block + 100]`, joined to the
    /// block store and keyed by the scanned range.
    pub fn get_transactions_of_account(
        &self,
        address: &str,
        min_block: u64,
        blocks: &BlockStore,
    ) -> Result<BTreeMap<String, Vec<Transaction>>> {
        let max_block = min_block.saturating_add(ACCOUNT_SCAN_SPAN);
        let hits: Vec<(Vec<u8>, TxLocation)> = self.db.iter_range(
            CF_TX_BY_BLOCK,
            &block_number_key(min_block),
            &block_number_key(max_block.saturating_add(1)),
        )?;

        let mut transactions = Vec::new();
        for (key, location) in hits {
            if location.sender != address && location.recipient != address {
                continue;
            }
            let txid = std::str::from_utf8(&key[8..])
                .map_err(|_| NodeError::TransientStorage("corrupt tx_by_block key".into()))?;
            if let Some(tx) = self.get_transaction(txid, blocks) {
                transactions.push(tx);
            }
        }

        let mut page = BTreeMap::new();
        page.insert(format!("{min_block}-{max_block}"), transactions);
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keys;
    use crate::types::transaction::{create_transaction, draft_transaction};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        blocks: BlockStore,
        accounts: AccountStore,
        index: TxIndex,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().expect("create temp dir");
        std::fs::create_dir_all(tmp.path().join("blocks")).unwrap();
        std::fs::create_dir_all(tmp.path().join("index")).unwrap();
        let db = Db::open(&tmp.path().join("index").join("db")).expect("open db");
        Fixture {
            blocks: BlockStore::new(tmp.path(), db.clone()),
            accounts: AccountStore::new(db.clone(), 0),
            index: TxIndex::new(db),
            _tmp: tmp,
        }
    }

    fn funded_tx(fx: &Fixture, recipient: &str, amount: u64, target_block: u64) -> Transaction {
        let keydict = generate_keys();
        fx.accounts
            .create_account(&keydict.address, 1_000_000)
            .expect("fund");
        let draft = draft_transaction(
            keydict.address.clone(),
            recipient,
            amount,
            keydict.public_key.clone(),
            1_700_000_000,
            json!(null),
            target_block,
        );
        create_transaction(draft, &keydict.private_key, 10).expect("create tx")
    }

    fn block_with(fx: &Fixture, number: u64, txs: Vec<Transaction>) -> Block {
        let mut block = Block::genesis("ndocreator", "203.0.113.7", 1_669_852_800);
        block.block_number = number;
        block.block_transactions = txs;
        fx.blocks.save_block(&block);
        fx.blocks.set_latest_block_info(&block);
        block
    }

    #[test]
    fn index_then_lookup_by_txid() {
        let fx = fixture();
        let recipient = generate_keys().address;
        let tx = funded_tx(&fx, &recipient, 500, 1);
        let block = block_with(&fx, 1, vec![tx.clone()]);

        assert!(fx.index.validate_uniqueness(&tx.txid).unwrap());
        fx.index
            .index_transactions(&block, &block.block_transactions, &fx.accounts)
            .expect("index");
        assert!(!fx.index.validate_uniqueness(&tx.txid).unwrap());

        let fetched = fx.index.get_transaction(&tx.txid, &fx.blocks).expect("found");
        assert_eq!(fetched, tx);
    }

    #[test]
    fn unindex_restores_uniqueness_and_balances() {
        let fx = fixture();
        let recipient = generate_keys().address;
        let tx = funded_tx(&fx, &recipient, 500, 1);
        let sender = tx.sender.clone();
        let block = block_with(&fx, 1, vec![tx.clone()]);

        fx.index
            .index_transactions(&block, &block.block_transactions, &fx.accounts)
            .expect("index");
        fx.index
            .unindex_transactions(&block, &fx.accounts)
            .expect("unindex");

        assert!(fx.index.validate_uniqueness(&tx.txid).unwrap());
        assert_eq!(fx.accounts.get_or_create(&sender).unwrap().balance, 1_000_000);
    }

    #[test]
    fn account_scan_finds_sender_and_recipient_sides() {
        let fx = fixture();
        let recipient = generate_keys().address;
        let tx = funded_tx(&fx, &recipient, 500, 1);
        let block = block_with(&fx, 1, vec![tx.clone()]);
        fx.index
            .index_transactions(&block, &block.block_transactions, &fx.accounts)
            .expect("index");

        for party in [&tx.sender, &recipient] {
            let page = fx
                .index
                .get_transactions_of_account(party, 0, &fx.blocks)
                .expect("scan");
            let hits = page.get("0-100").expect("range key");
            assert_eq!(hits.len(), 1, "party {party} should see the transaction");
            assert_eq!(hits[0].txid, tx.txid);
        }

        // An unrelated account sees nothing.
        let page = fx
            .index
            .get_transactions_of_account("ndounrelated", 0, &fx.blocks)
            .expect("scan");
        assert!(page.get("0-100").unwrap().is_empty());
    }
}
