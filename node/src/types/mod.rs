//! Core domain types shared across the node.
//!
//! Transactions, blocks and peer records are plain serde structs whose
//! field order defines the canonical encoding (see [`crate::hashing`]).
//! Amounts are integers in base units; one coin is 10^9 units.

use serde::{Deserialize, Serialize};

pub mod block;
pub mod peer;
pub mod transaction;

pub use block::{Block, compute_block_hash};
pub use peer::{PeerRecord, StatusReport};
pub use transaction::{Transaction, TransactionDraft, create_transaction, draft_transaction};

/// Base units per coin.
pub const UNITS_PER_COIN: u64 = 1_000_000_000;

/// Sentinel recipient that destroys the sent amount.
pub const BURN_ADDRESS: &str = "burn";

/// Account row: balances are base-unit integers and never go negative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub balance: u64,
    pub produced: u64,
    pub burned: u64,
}

impl Account {
    /// A fresh account with all counters at zero.
    pub fn empty(address: impl Into<String>) -> Self {
        Account {
            address: address.into(),
            balance: 0,
            produced: 0,
            burned: 0,
        }
    }
}

/// Singleton aggregate over all incorporated blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub produced: u64,
    pub fees: u64,
    pub burned: u64,
}

/// Signed per-block deltas applied to [`Totals`]; negative on revert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TotalsDelta {
    pub produced: i128,
    pub fees: i128,
    pub burned: i128,
}

/// Formats a base-unit amount as a decimal coin string with ten places.
pub fn to_readable_amount(raw_amount: u64) -> String {
    let whole = raw_amount / UNITS_PER_COIN;
    let frac = raw_amount % UNITS_PER_COIN;
    format!("{whole}.{frac:09}0")
}

/// Parses a decimal coin amount into base units, truncating excess
/// precision.
pub fn to_raw_amount(amount: f64) -> u64 {
    (amount * UNITS_PER_COIN as f64) as u64
}
