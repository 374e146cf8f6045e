//! Producer election and block construction.
//!
//! Producer selection is deterministic from shared state: every node
//! scores every producer address against the latest block hash and the
//! producer with the lowest penalty mints the block. Burned coins buy the
//! score down, accumulated production pushes it up, so the rotation spreads
//! across the producer set.

use std::collections::HashMap;

use crate::error::{NodeError, Result};
use crate::hashing::blake2b_hash_link;
use crate::storage::{AccountStore, BlockStore, PeerStore};
use crate::types::{Block, Transaction, compute_block_hash};

/// Blocks below this height score with the positional legacy formula.
pub const LEGACY_PENALTY_HEIGHT: u64 = 20_000;

/// Reward cap per block, in base units.
pub const REWARD_CAP: u64 = 5_000_000_000;

/// Reward contributed per transaction in the lookback window.
pub const REWARD_PER_TX: u64 = 1_000_000;

/// Blocks inspected for the reward window.
pub const REWARD_LOOKBACK: u64 = 100;

fn count_occurrences(haystack: &str, needle: char) -> u64 {
    haystack.chars().filter(|c| *c == needle).count() as u64
}

/// Scores an address against a block hash; lower is better.
pub fn get_hash_penalty(address: &str, block_hash: &str, block_number: u64) -> u64 {
    if block_number > LEGACY_PENALTY_HEIGHT {
        let address_mingled = blake2b_hash_link(&address, &block_hash);
        address_mingled
            .chars()
            .map(|c| count_occurrences(block_hash, c))
            .sum()
    } else {
        // compat: positional match plus combined character counts
        let shorter = if address.len() <= block_hash.len() {
            address
        } else {
            block_hash
        };
        let hash_chars: Vec<char> = block_hash.chars().collect();

        let mut score = 0u64;
        for (position, letter) in shorter.chars().enumerate() {
            if hash_chars.get(position) == Some(&letter) {
                score += 1;
            }
            score += count_occurrences(address, letter);
            score += count_occurrences(block_hash, letter);
        }
        score
    }
}

/// Full producer score: the hash penalty, pushed up by past production and
/// bought down by burn, floored at the hash penalty itself.
pub fn get_penalty(
    accounts: &AccountStore,
    producer_address: &str,
    block_hash: &str,
    block_number: u64,
) -> Result<u64> {
    let hash_penalty = get_hash_penalty(producer_address, block_hash, block_number) as i128;

    let account = accounts.get_account(producer_address, false)?;
    let miner_penalty = account.as_ref().map(|a| a.produced).unwrap_or(0) as i128;
    let burn_bonus = account.as_ref().map(|a| a.burned).unwrap_or(0) as i128;

    let adjusted = hash_penalty + miner_penalty - burn_bonus * 100;
    let block_penalty = adjusted.max(hash_penalty);
    Ok(block_penalty as u64)
}

/// Elects the producer with the smallest penalty and returns the full
/// penalty map for publication.
///
/// A producer IP with no loadable address is skipped.
pub fn pick_best_producer(
    block_producers: &[String],
    peers: &PeerStore,
    accounts: &AccountStore,
    latest_block: &Block,
) -> (Option<String>, HashMap<String, u64>) {
    let block_hash = &latest_block.block_hash;

    let mut best_penalty: Option<u64> = None;
    let mut best_producer: Option<String> = None;
    let mut penalty_map: HashMap<String, u64> = HashMap::new();

    for producer_ip in block_producers {
        let Some(record) = peers.load_peer(producer_ip) else {
            continue;
        };
        let producer_address = record.peer_address;

        let Ok(block_penalty) = get_penalty(
            accounts,
            &producer_address,
            block_hash,
            latest_block.block_number,
        ) else {
            continue;
        };

        penalty_map.insert(producer_address, block_penalty);

        if best_penalty.is_none_or(|previous| block_penalty <= previous) {
            best_penalty = Some(block_penalty);
            best_producer = Some(producer_ip.clone());
        }
    }

    (best_producer, penalty_map)
}

/// Reward for the next block: proportional to recent traffic, capped.
pub fn get_block_reward(blocks: &BlockStore, latest_block: &Block) -> u64 {
    let latest_number = latest_block.block_number;
    let floor = latest_number.saturating_sub(REWARD_LOOKBACK);

    let mut tx_count: u64 = 0;
    let mut cursor = Some(latest_block.clone());
    while let Some(block) = cursor {
        if block.block_number == 0 || block.block_number <= floor {
            break;
        }
        tx_count += block.block_transactions.len() as u64;
        cursor = block
            .parent_hash
            .as_deref()
            .and_then(|parent| blocks.get_block(parent));
    }

    (tx_count * REWARD_PER_TX).min(REWARD_CAP)
}

/// Average fee of the latest block's transactions.
pub fn fee_over_blocks(latest_block: &Block) -> u64 {
    let fees: Vec<u64> = latest_block
        .block_transactions
        .iter()
        .map(|tx| tx.fee)
        .collect();
    if fees.is_empty() {
        return 0;
    }
    fees.iter().sum::<u64>() / fees.len() as u64
}

/// Assembles a block: hash first, then the derived slots.
#[allow(clippy::too_many_arguments)]
pub fn construct_block(
    accounts: &AccountStore,
    block_timestamp: u64,
    block_number: u64,
    parent_hash: &str,
    block_ip: &str,
    creator: &str,
    block_transactions: Vec<Transaction>,
    block_producers_hash: Option<String>,
    block_reward: u64,
) -> Result<Block> {
    let block_hash = compute_block_hash(
        block_number,
        Some(parent_hash),
        block_ip,
        creator,
        &block_transactions,
        block_producers_hash.as_deref(),
        block_reward,
    );

    let block_penalty = get_penalty(accounts, creator, &block_hash, block_number)?;

    Ok(Block {
        block_number,
        block_hash,
        parent_hash: Some(parent_hash.to_string()),
        block_ip: block_ip.to_string(),
        block_creator: creator.to_string(),
        block_timestamp,
        block_transactions,
        block_penalty,
        block_producers_hash,
        child_hash: None,
        block_reward,
    })
}

/// Keeps only transactions targeting exactly `block_number`.
pub fn match_transactions_target(pool: &[Transaction], block_number: u64) -> Vec<Transaction> {
    pool.iter()
        .filter(|tx| tx.target_block == block_number)
        .cloned()
        .collect()
}

/// True when every transaction targets exactly `block_number`.
pub fn check_target_match(pool: &[Transaction], block_number: u64) -> bool {
    pool.iter().all(|tx| tx.target_block == block_number)
}

/// A block timestamp must not come from the future.
pub fn valid_block_timestamp(now: u64, block: &Block) -> bool {
    if block.block_number < LEGACY_PENALTY_HEIGHT {
        return true; // compat
    }
    now >= block.block_timestamp
}

/// Builds the local block candidate for the next height.
///
/// The elected producer's address becomes the creator; the timestamp is
/// derived from the parent so independently-built candidates hash alike.
/// Returns the candidate and the penalty map for publication.
pub fn get_block_candidate(
    blocks: &BlockStore,
    accounts: &AccountStore,
    peers: &PeerStore,
    block_producers: &[String],
    block_producers_hash: Option<String>,
    transaction_pool: &[Transaction],
    latest_block: &Block,
    block_time: u64,
) -> Result<(Block, HashMap<String, u64>)> {
    let (best_producer, penalty_map) =
        pick_best_producer(block_producers, peers, accounts, latest_block);

    let Some(best_producer) = best_producer else {
        return Err(NodeError::validation(
            "no producer with a loadable address",
        ));
    };

    let creator = peers
        .load_peer(&best_producer)
        .map(|record| record.peer_address)
        .ok_or_else(|| NodeError::validation(format!("no address for {best_producer}")))?;

    let block_number = latest_block.block_number + 1;
    let targeted = match_transactions_target(transaction_pool, block_number);

    let block = construct_block(
        accounts,
        latest_block.block_timestamp + block_time,
        block_number,
        &latest_block.block_hash,
        &best_producer,
        &creator,
        targeted,
        block_producers_hash,
        get_block_reward(blocks, latest_block),
    )?;

    Ok((block, penalty_map))
}

/// Rebuilds a remote block on top of our own chain view.
///
/// Parent, number and timestamp come from our latest block; creator, IP,
/// transactions, producer hash and reward stay remote.
pub fn rebuild_block(
    accounts: &AccountStore,
    remote: &Block,
    latest_block: &Block,
    block_time: u64,
) -> Result<Block> {
    construct_block(
        accounts,
        latest_block.block_timestamp + block_time,
        latest_block.block_number + 1,
        &latest_block.block_hash,
        &remote.block_ip,
        &remote.block_creator,
        remote.block_transactions.clone(),
        remote.block_producers_hash.clone(),
        remote.block_reward,
    )
}
