//! Transaction pool operations.
//!
//! Pools are plain vectors ordered deterministically by txid. Buffer
//! migration admits the highest fees first under a byte-size limit and a
//! target-block window; culling drops the lowest fees once a pool
//! overflows its limit.

use std::collections::HashSet;

use crate::error::{NodeError, Result};
use crate::hashing::canonical_json;
use crate::storage::AccountStore;
use crate::types::Transaction;

/// Gossiped transactions stay valid for this many blocks past the tip.
pub const TARGET_BLOCK_WINDOW: u64 = 360;

/// Deduplicates while keeping first-seen order.
pub fn dedupe_pool(pool: &[Transaction]) -> Vec<Transaction> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut clean = Vec::with_capacity(pool.len());
    for transaction in pool {
        if seen.insert(transaction.txid.as_str()) {
            clean.push(transaction.clone());
        }
    }
    clean
}

/// Canonical pool order: deduplicated, ascending by txid.
pub fn sort_transaction_pool(pool: &[Transaction]) -> Vec<Transaction> {
    let mut sorted = dedupe_pool(pool);
    sorted.sort_by(|a, b| a.txid.cmp(&b.txid));
    sorted
}

/// Highest-fee entry, ties by iteration order.
pub fn max_from_pool(pool: &[Transaction]) -> Option<&Transaction> {
    pool.iter().max_by_key(|tx| tx.fee)
}

/// Lowest-fee entry, ties by iteration order.
pub fn min_from_pool(pool: &[Transaction]) -> Option<&Transaction> {
    pool.iter().min_by_key(|tx| tx.fee)
}

/// Approximate byte size of a pool, used against pool limits.
pub fn pool_byte_size(pool: &[Transaction]) -> usize {
    canonical_json(&pool).len()
}

/// Outcome of a buffer migration.
pub struct MergedBuffers {
    pub from_buffer: Vec<Transaction>,
    pub to_buffer: Vec<Transaction>,
}

/// Moves transactions between buffers, best fees first.
///
/// A transaction moves when the destination is under `limit` bytes and its
/// target block lies in `(block_min, block_max]`. Everything else stays.
pub fn merge_buffer(
    from_buffer: &[Transaction],
    to_buffer: &[Transaction],
    limit: usize,
    block_min: u64,
    block_max: u64,
) -> MergedBuffers {
    let mut remaining = dedupe_pool(from_buffer);
    remaining.sort_by(|a, b| b.fee.cmp(&a.fee));

    let mut to_buffer = dedupe_pool(to_buffer);
    let mut kept = Vec::new();

    for transaction in remaining {
        let fits = pool_byte_size(&to_buffer) < limit;
        let targeted =
            block_min < transaction.target_block && transaction.target_block <= block_max;
        let duplicate = to_buffer.iter().any(|tx| tx.txid == transaction.txid);

        if fits && targeted && !duplicate {
            to_buffer.push(transaction);
        } else {
            kept.push(transaction);
        }
    }

    MergedBuffers {
        from_buffer: kept,
        to_buffer: sort_transaction_pool(&to_buffer),
    }
}

/// Drops minimum-fee entries until the pool fits its byte limit.
pub fn cull_buffer(pool: &[Transaction], limit: usize) -> Vec<Transaction> {
    let mut pool = dedupe_pool(pool);
    while pool.len() > 1 && pool_byte_size(&pool) > limit {
        if let Some(min_txid) = min_from_pool(&pool).map(|tx| tx.txid.clone()) {
            pool.retain(|tx| tx.txid != min_txid);
        } else {
            break;
        }
    }
    pool
}

/// Keeps only transactions still targeting a future block inside the
/// validity window.
pub fn remove_outdated_transactions(pool: &[Transaction], block_number: u64) -> Vec<Transaction> {
    pool.iter()
        .filter(|tx| {
            block_number < tx.target_block && tx.target_block < block_number + TARGET_BLOCK_WINDOW
        })
        .cloned()
        .collect()
}

/// Distinct senders of a pool, first-seen order.
pub fn get_senders(pool: &[Transaction]) -> Vec<String> {
    let mut senders = Vec::new();
    for transaction in pool {
        if !senders.contains(&transaction.sender) {
            senders.push(transaction.sender.clone());
        }
    }
    senders
}

fn check_sender_spending(
    accounts: &AccountStore,
    pool: &[Transaction],
    sender: &str,
) -> Result<()> {
    let standing_balance = accounts
        .get_account(sender, false)?
        .map(|account| account.balance)
        .ok_or_else(|| NodeError::validation(format!("unknown sender {sender}")))? as i128;

    let mut spending: i128 = 0;
    for transaction in pool.iter().filter(|tx| tx.sender == sender) {
        let single = transaction.amount as i128 + transaction.fee as i128;
        if standing_balance - single <= 0 {
            return Err(NodeError::validation(format!(
                "{sender} spending more than owned in a single transaction"
            )));
        }
        spending += single;
        if spending > standing_balance {
            return Err(NodeError::validation(format!(
                "overspending attempt by {sender}"
            )));
        }
    }
    Ok(())
}

/// Validates one sender's future spending: the pool plus the incoming
/// transaction must stay within the standing balance.
pub fn validate_single_spending(
    accounts: &AccountStore,
    pool: &[Transaction],
    transaction: &Transaction,
) -> Result<()> {
    let mut future_pool = pool.to_vec();
    future_pool.push(transaction.clone());
    check_sender_spending(accounts, &future_pool, &transaction.sender)
}

/// Validates every sender in a pool against their standing balance.
pub fn validate_all_spending(accounts: &AccountStore, pool: &[Transaction]) -> Result<()> {
    for sender in get_senders(pool) {
        check_sender_spending(accounts, pool, &sender)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keys;
    use crate::storage::Db;
    use crate::types::transaction::{create_transaction, draft_transaction};
    use serde_json::json;
    use tempfile::TempDir;

    fn keyed_tx(keydict: &crate::keys::KeyDict, amount: u64, fee: u64, target: u64) -> Transaction {
        let draft = draft_transaction(
            keydict.address.clone(),
            generate_keys().address,
            amount,
            keydict.public_key.clone(),
            1_700_000_000,
            json!(null),
            target,
        );
        create_transaction(draft, &keydict.private_key, fee).expect("create tx")
    }

    fn dummy_tx(fee: u64, target: u64) -> Transaction {
        keyed_tx(&generate_keys(), 100, fee, target)
    }

    #[test]
    fn pool_order_is_by_txid_and_deduplicated() {
        let a = dummy_tx(5, 2);
        let b = dummy_tx(9, 2);
        let pool = vec![b.clone(), a.clone(), b.clone()];

        let sorted = sort_transaction_pool(&pool);
        assert_eq!(sorted.len(), 2);
        assert!(sorted[0].txid < sorted[1].txid);
    }

    #[test]
    fn merge_moves_best_fees_inside_window() {
        let high = dummy_tx(500, 5);
        let low = dummy_tx(1, 5);
        let outside = dummy_tx(900, 50);

        let merged = merge_buffer(
            &[low.clone(), high.clone(), outside.clone()],
            &[],
            1_000_000,
            0,
            25,
        );

        let moved: Vec<&str> = merged.to_buffer.iter().map(|tx| tx.txid.as_str()).collect();
        assert!(moved.contains(&high.txid.as_str()));
        assert!(moved.contains(&low.txid.as_str()));
        // Target outside (0, 25] stays behind.
        assert_eq!(merged.from_buffer.len(), 1);
        assert_eq!(merged.from_buffer[0].txid, outside.txid);
    }

    #[test]
    fn merge_respects_byte_limit() {
        let a = dummy_tx(10, 5);
        let b = dummy_tx(20, 5);

        // A tiny limit admits only while the destination is empty, so
        // exactly one transaction moves.
        let merged = merge_buffer(&[a, b], &[], 3, 0, 25);
        assert_eq!(merged.to_buffer.len(), 1);
        assert_eq!(merged.from_buffer.len(), 1);
        // The higher fee went first.
        assert_eq!(merged.to_buffer[0].fee, 20);
    }

    #[test]
    fn cull_drops_minimum_fees_first() {
        let pool = vec![dummy_tx(1, 5), dummy_tx(50, 5), dummy_tx(100, 5)];
        let culled = cull_buffer(&pool, 1);
        // Shrinks down to a single survivor: the highest fee.
        assert_eq!(culled.len(), 1);
        assert_eq!(culled[0].fee, 100);
    }

    #[test]
    fn outdated_transactions_are_pruned() {
        let stale = dummy_tx(1, 3);
        let live = dummy_tx(1, 10);
        let pruned = remove_outdated_transactions(&[stale, live.clone()], 3);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].txid, live.txid);
    }

    #[test]
    fn overspending_pool_is_rejected() {
        let tmp = TempDir::new().expect("create temp dir");
        let db = Db::open(tmp.path()).expect("open db");
        let accounts = AccountStore::new(db, 0);

        let keydict = generate_keys();
        accounts.create_account(&keydict.address, 100).unwrap();

        let first = keyed_tx(&keydict, 60, 0, 2);
        let second = keyed_tx(&keydict, 60, 0, 2);

        assert!(validate_single_spending(&accounts, &[], &first).is_ok());
        let err = validate_single_spending(&accounts, &[first.clone()], &second).unwrap_err();
        assert!(matches!(err, NodeError::ValidationFailure(_)));

        assert!(validate_all_spending(&accounts, &[first.clone()]).is_ok());
        assert!(validate_all_spending(&accounts, &[first, second]).is_err());
    }

    #[test]
    fn unknown_sender_cannot_spend() {
        let tmp = TempDir::new().expect("create temp dir");
        let db = Db::open(tmp.path()).expect("open db");
        let accounts = AccountStore::new(db, 0);

        let orphan = dummy_tx(0, 2);
        assert!(validate_single_spending(&accounts, &[], &orphan).is_err());
    }
}
