//! Block record and hashing.
//!
//! A block commits to its parent through a hash link: the block hash is the
//! Blake2b digest of `(parent_hash, preimage)` where the preimage is the
//! block body with the hash, timestamp, penalty and child slots unset. The
//! timestamp is derived (`parent timestamp + block time`), so it stays out
//! of the hash and candidates built independently across the network agree
//! on it.
//!
//! Stored blocks are immutable except for `child_hash`, which the parent
//! gains when its child is accepted.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hashing::{blake2b_hash_link, canonical_json};

use super::transaction::Transaction;

/// The unit of replication.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_number: u64,
    pub block_hash: String,
    /// `None` only for genesis.
    pub parent_hash: Option<String>,
    /// IP of the producer that minted this block.
    pub block_ip: String,
    /// Address credited with the reward.
    pub block_creator: String,
    pub block_timestamp: u64,
    pub block_transactions: Vec<Transaction>,
    /// Producer score at production time; lower won the election.
    pub block_penalty: u64,
    /// Hash of the sorted producer IP set at production time.
    pub block_producers_hash: Option<String>,
    /// Filled in the stored parent once a child is accepted.
    pub child_hash: Option<String>,
    pub block_reward: u64,
}

/// Hash preimage: the block body with derived slots unset.
///
/// Field order mirrors [`Block`]; both sides of the network must build the
/// same preimage for candidate hashes to match.
#[derive(Serialize)]
struct BlockPreimage<'a> {
    block_number: u64,
    block_hash: Option<()>,
    parent_hash: Option<&'a str>,
    block_ip: &'a str,
    block_creator: &'a str,
    block_timestamp: Option<()>,
    block_transactions: &'a [Transaction],
    block_penalty: Option<()>,
    block_producers_hash: Option<&'a str>,
    child_hash: Option<()>,
    block_reward: u64,
}

/// Computes the canonical hash for a block body on top of `parent_hash`.
#[allow(clippy::too_many_arguments)]
pub fn compute_block_hash(
    block_number: u64,
    parent_hash: Option<&str>,
    block_ip: &str,
    block_creator: &str,
    block_transactions: &[Transaction],
    block_producers_hash: Option<&str>,
    block_reward: u64,
) -> String {
    let preimage = BlockPreimage {
        block_number,
        block_hash: None,
        parent_hash,
        block_ip,
        block_creator,
        block_timestamp: None,
        block_transactions,
        block_penalty: None,
        block_producers_hash,
        child_hash: None,
        block_reward,
    };
    blake2b_hash_link(&parent_hash, &preimage)
}

impl Block {
    /// Builds the genesis block installed at bootstrap.
    ///
    /// Genesis is hash-linked from its timestamp instead of a parent.
    pub fn genesis(address: impl Into<String>, ip: impl Into<String>, timestamp: u64) -> Self {
        let block_transactions: Vec<Transaction> = Vec::new();
        let block_hash = blake2b_hash_link(&timestamp, &block_transactions);

        Block {
            block_number: 0,
            block_hash,
            parent_hash: None,
            block_ip: ip.into(),
            block_creator: address.into(),
            block_timestamp: timestamp,
            block_transactions,
            block_penalty: 0,
            block_producers_hash: None,
            child_hash: None,
            block_reward: 0,
        }
    }

    /// Recomputes this block's hash from its own body.
    pub fn computed_hash(&self) -> String {
        compute_block_hash(
            self.block_number,
            self.parent_hash.as_deref(),
            &self.block_ip,
            &self.block_creator,
            &self.block_transactions,
            self.block_producers_hash.as_deref(),
            self.block_reward,
        )
    }

    /// Canonical MessagePack bytes; the on-disk and wire encoding.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Approximate size used for pool limits and reporting.
    pub fn byte_size(&self) -> usize {
        canonical_json(self).len()
    }

    /// Blocks older than a day skip full re-validation under `quick_sync`.
    pub fn is_old(&self, now: u64) -> bool {
        self.block_timestamp < now.saturating_sub(86_400)
    }
}
