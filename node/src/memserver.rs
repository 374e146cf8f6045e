//! Shared in-memory node state.
//!
//! One MemServer instance is wrapped in a single async mutex and shared by
//! every worker and the HTTP surface. That mutex is the buffer lock of the
//! design: every mutation of the three transaction pools happens under it,
//! so a merge, a buffer migration and block-time validation can never
//! interleave. Readers that iterate snapshot the lists first.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::config::{BLOCK_TIME, NodeConfig, get_timestamp_seconds};
use crate::hashing::blake2b_hash;
use crate::keys::KeyDict;
use crate::pool::{
    TARGET_BLOCK_WINDOW, sort_transaction_pool, validate_single_spending,
};
use crate::storage::Stores;
use crate::types::transaction::validate_transaction;
use crate::types::{Block, StatusReport, Transaction};

/// Byte budget of the mempool proper.
pub const TRANSACTION_POOL_LIMIT: usize = 150_000;

/// Byte budget of each staging buffer.
pub const TRANSACTION_BUFFER_LIMIT: usize = 1_500_000;

/// Answer returned to a submitter.
#[derive(Clone, Debug, Serialize)]
pub struct MergeOutcome {
    pub result: bool,
    pub message: String,
}

impl MergeOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        MergeOutcome {
            result: false,
            message: message.into(),
        }
    }

    fn accepted() -> Self {
        MergeOutcome {
            result: true,
            message: "Success".to_string(),
        }
    }
}

/// Transient node state, owned by the worker loops.
pub struct MemServer {
    pub config: NodeConfig,
    pub keydict: KeyDict,
    pub start_time: u64,
    pub genesis_timestamp: u64,

    /// Mempool: transactions eligible for the next block.
    pub transaction_pool: Vec<Transaction>,
    /// Node-gossip staging buffer.
    pub tx_buffer: Vec<Transaction>,
    /// User-submission staging buffer.
    pub user_tx_buffer: Vec<Transaction>,

    pub peers: Vec<String>,
    pub block_producers: Vec<String>,
    pub peer_buffer: Vec<String>,
    /// Appended from any worker; drained by the peer loop.
    pub purge_peers_list: Vec<String>,
    /// IP -> ban timestamp.
    pub unreachable: HashMap<String, u64>,
    /// Last published producer penalty map.
    pub penalties: HashMap<String, u64>,

    pub latest_block: Block,
    pub earliest_block_hash: String,
    pub transaction_pool_hash: Option<String>,
    pub block_producers_hash: Option<String>,

    pub since_last_block: u64,
    pub reported_uptime: u64,
    /// Active phases of the core loop for this cycle.
    pub periods: BTreeSet<u8>,
    pub emergency_mode: bool,
    pub force_sync_ip: Option<String>,
    pub rollbacks: u32,
    /// Remote blocks accepted in the current sync burst; decays each
    /// cycle and holds the node in period 0 while positive.
    pub consecutive_sync_blocks: u32,
    pub cascade_depth: usize,
    pub can_mine: bool,

    /// Duration of the last core cycle, for observability.
    pub core_duration: u64,
    /// Duration of the last peer cycle, for observability.
    pub peer_duration: u64,

    pub block_time: u64,
    pub transaction_pool_limit: usize,
    pub transaction_buffer_limit: usize,
}

impl MemServer {
    pub fn new(
        config: NodeConfig,
        keydict: KeyDict,
        latest_block: Block,
        earliest_block_hash: String,
        block_producers: Vec<String>,
    ) -> Self {
        let mut periods = BTreeSet::new();
        periods.extend([0u8, 1, 2]);

        MemServer {
            config,
            keydict,
            start_time: get_timestamp_seconds(),
            genesis_timestamp: 1_669_852_800,
            transaction_pool: Vec::new(),
            tx_buffer: Vec::new(),
            user_tx_buffer: Vec::new(),
            peers: Vec::new(),
            block_producers,
            peer_buffer: Vec::new(),
            purge_peers_list: Vec::new(),
            unreachable: HashMap::new(),
            penalties: HashMap::new(),
            latest_block,
            earliest_block_hash,
            transaction_pool_hash: None,
            block_producers_hash: None,
            since_last_block: 0,
            reported_uptime: 0,
            periods,
            emergency_mode: false,
            force_sync_ip: None,
            rollbacks: 0,
            consecutive_sync_blocks: 0,
            cascade_depth: 0,
            can_mine: false,
            core_duration: 0,
            peer_duration: 0,
            block_time: BLOCK_TIME,
            transaction_pool_limit: TRANSACTION_POOL_LIMIT,
            transaction_buffer_limit: TRANSACTION_BUFFER_LIMIT,
        }
    }

    /// Seconds since this process started.
    pub fn get_uptime(&self) -> u64 {
        get_timestamp_seconds().saturating_sub(self.start_time)
    }

    /// Hash of the sorted mempool; `None` while empty.
    pub fn get_transaction_pool_hash(&self) -> Option<String> {
        if self.transaction_pool.is_empty() {
            return None;
        }
        Some(blake2b_hash(&sort_transaction_pool(&self.transaction_pool)))
    }

    /// Hash of the sorted producer set; `None` while empty.
    ///
    /// Sorts the producer list in place so the reported set and its hash
    /// always agree.
    pub fn get_block_producers_hash(&mut self) -> Option<String> {
        if self.block_producers.is_empty() {
            return None;
        }
        self.block_producers.sort();
        self.block_producers.dedup();
        Some(blake2b_hash(&self.block_producers))
    }

    /// The snapshot served at `/status`.
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            reported_uptime: self.reported_uptime,
            address: self.keydict.address.clone(),
            transaction_pool_hash: self.transaction_pool_hash.clone(),
            block_producers_hash: self.block_producers_hash.clone(),
            latest_block_hash: self.latest_block.block_hash.clone(),
            earliest_block_hash: self.earliest_block_hash.clone(),
            protocol: self.config.protocol,
            version: crate::config::VERSION.to_string(),
        }
    }

    fn present_in_any_pool(&self, transaction: &Transaction) -> bool {
        self.transaction_pool
            .iter()
            .chain(self.tx_buffer.iter())
            .chain(self.user_tx_buffer.iter())
            .any(|tx| tx.txid == transaction.txid)
    }

    fn united_pools(&self) -> Vec<Transaction> {
        self.transaction_pool
            .iter()
            .chain(self.tx_buffer.iter())
            .chain(self.user_tx_buffer.iter())
            .cloned()
            .collect()
    }

    /// Admits a transaction into the buffers.
    ///
    /// Caller holds the buffer lock. Admission runs the full gauntlet:
    /// known sender, target window, novelty, validity, uniqueness and
    /// future spending across the union of all three pools. An
    /// overspending sender loses every pending transaction (the
    /// anti-double-spend purge).
    pub fn merge_transaction(
        &mut self,
        stores: &Stores,
        transaction: Transaction,
        user_origin: bool,
    ) -> MergeOutcome {
        let sender_known = stores
            .accounts
            .get_account(&transaction.sender, false)
            .ok()
            .flatten()
            .is_some();
        if !sender_known {
            return MergeOutcome::rejected("Empty account");
        }

        let latest_number = self.latest_block.block_number;
        if transaction.target_block < latest_number {
            return MergeOutcome::rejected("Target block too low");
        }
        if transaction.target_block > latest_number + TARGET_BLOCK_WINDOW {
            return MergeOutcome::rejected("Target block too high");
        }

        if self.present_in_any_pool(&transaction) {
            return MergeOutcome::rejected("Transaction already known");
        }

        if let Err(e) = validate_transaction(
            &transaction,
            latest_number,
            self.config.legacy_signature_height,
        ) {
            return MergeOutcome::rejected(format!("Could not merge transaction: {e}"));
        }

        match stores.transactions.validate_uniqueness(&transaction.txid) {
            Ok(true) => {}
            Ok(false) => {
                return MergeOutcome::rejected(format!(
                    "Transaction {} already exists",
                    transaction.txid
                ));
            }
            Err(e) => return MergeOutcome::rejected(format!("Uniqueness check failed: {e}")),
        }

        let united = self.united_pools();
        if let Err(e) = validate_single_spending(&stores.accounts, &united, &transaction) {
            self.purge_txs_of_sender(&transaction.sender);
            return MergeOutcome::rejected(format!("Transaction failed to validate: {e}"));
        }

        if user_origin && !self.tx_buffer.iter().any(|tx| tx.txid == transaction.txid) {
            self.user_tx_buffer.push(transaction);
            self.user_tx_buffer = sort_transaction_pool(&self.user_tx_buffer);
        } else {
            self.tx_buffer.push(transaction);
            self.tx_buffer = sort_transaction_pool(&self.tx_buffer);
        }
        MergeOutcome::accepted()
    }

    /// Admits a batch, ignoring individual rejections.
    pub fn merge_transactions(
        &mut self,
        stores: &Stores,
        transactions: Vec<Transaction>,
        user_origin: bool,
    ) {
        for transaction in transactions {
            self.merge_transaction(stores, transaction, user_origin);
        }
    }

    /// Drops every pending transaction of `sender` from the mempool and
    /// the node buffer, stopping a split double-spend from spreading.
    pub fn purge_txs_of_sender(&mut self, sender: &str) {
        self.transaction_pool.retain(|tx| tx.sender != sender);
        self.tx_buffer.retain(|tx| tx.sender != sender);
    }

    /// Queues a peer for removal; any worker may call this.
    pub fn schedule_purge(&mut self, ip: &str) {
        if !self.purge_peers_list.contains(&ip.to_string()) {
            self.purge_peers_list.push(ip.to_string());
        }
    }
}
