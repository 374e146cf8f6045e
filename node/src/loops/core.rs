//! Core loop: the phase machine.
//!
//! Every second the loop derives the active period set from the age of the
//! latest block and runs the matching actions: user-buffer migration (0),
//! node-buffer migration (1), minority replacement (2), block production
//! (3). When the local chain tip diverges from the network majority the
//! loop flips into emergency mode, where only sync activity (remote block
//! replay or rollback) happens until the majority is reached again.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::get_timestamp_seconds;
use crate::consensus::Consensus;
use crate::context::NodeContext;
use crate::error::{NodeError, Result};
use crate::memserver::MemServer;
use crate::pool::{cull_buffer, merge_buffer, remove_outdated_transactions, sort_transaction_pool, validate_all_spending};
use crate::production::{
    LEGACY_PENALTY_HEIGHT, check_target_match, get_block_candidate, rebuild_block,
    valid_block_timestamp,
};
use crate::rollback::rollback_one_block;
use crate::storage::{AccountStore, Stores, retry_forever};
use crate::sync::get_peer_to_sync_from;
use crate::types::{Block, Transaction, to_readable_amount};
use crate::types::transaction::validate_transaction;

/// Blocks fetched per emergency sync batch.
const SYNC_BATCH: usize = 50;

/// Seconds past the block boundary before production starts.
const PRODUCTION_MARGIN: u64 = 3;

/// User-buffer transactions may target up to this many blocks ahead.
const USER_BUFFER_HORIZON: u64 = 25;

/// True when our sample disagrees with a known majority.
pub fn minority_consensus(majority_hash: Option<&str>, sample_hash: Option<&str>) -> bool {
    match majority_hash {
        None => false,
        Some(majority) => sample_hash != Some(majority),
    }
}

/// Derives the period set for this cycle; see the phase table in the
/// module docs of [`crate::loops`].
pub fn update_periods(memserver: &mut MemServer) {
    let now = get_timestamp_seconds();
    memserver.since_last_block = now.saturating_sub(memserver.latest_block.block_timestamp);
    let since = memserver.since_last_block;
    let block_time = memserver.block_time;

    let old_periods = memserver.periods.clone();
    let mut periods: BTreeSet<u8> = BTreeSet::new();

    if memserver.reported_uptime < block_time {
        periods.extend([0, 1, 2]);
    } else if since < 20
        || memserver.consecutive_sync_blocks > 0
        || memserver.force_sync_ip.is_some()
    {
        periods.insert(0);
    } else if since < 40 {
        periods.insert(1);
    } else if since < block_time {
        periods.insert(2);
    } else if since > block_time + PRODUCTION_MARGIN {
        periods.insert(3);
    } else {
        periods.extend([0, 1, 2]);
    }

    if old_periods != periods {
        tracing::info!("switched to periods {periods:?}");
    }
    memserver.periods = periods;

    memserver.consecutive_sync_blocks = memserver.consecutive_sync_blocks.saturating_sub(1);
}

fn validate_transactions_in_block(
    stores: &Stores,
    memserver: &mut MemServer,
    consensus: &mut Consensus,
    block: &Block,
    remote: bool,
    remote_peer: Option<&str>,
) -> Result<Vec<Transaction>> {
    let punish = |consensus: &mut Consensus, value: i64| {
        if let (true, Some(peer)) = (remote, remote_peer) {
            consensus.change_trust(peer, value);
        }
    };

    let transactions = sort_transaction_pool(&block.block_transactions);

    if block.block_number > LEGACY_PENALTY_HEIGHT // compat
        && !check_target_match(&transactions, block.block_number)
    {
        punish(consensus, -1000);
        return Err(NodeError::validation("transactions mismatch target block"));
    }

    if let Err(e) = validate_all_spending(&stores.accounts, &transactions) {
        punish(consensus, -1000);
        return Err(NodeError::validation(format!(
            "spending validation failed during block preparation: {e}"
        )));
    }

    for transaction in &transactions {
        memserver
            .transaction_pool
            .retain(|tx| tx.txid != transaction.txid);
        memserver.tx_buffer.retain(|tx| tx.txid != transaction.txid);
        memserver
            .user_tx_buffer
            .retain(|tx| tx.txid != transaction.txid);

        if let Err(e) = validate_transaction(
            transaction,
            block.block_number,
            memserver.config.legacy_signature_height,
        ) {
            punish(consensus, -1000);
            return Err(e);
        }

        match stores.transactions.validate_uniqueness(&transaction.txid) {
            Ok(true) => {}
            Ok(false) => {
                punish(consensus, -1000);
                return Err(NodeError::validation(format!(
                    "transaction {} already exists",
                    transaction.txid
                )));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(transactions)
}

/// Runs the critical acceptance checks; failure skips the block.
fn verify_block(
    stores: &Stores,
    memserver: &mut MemServer,
    consensus: &mut Consensus,
    block: &Block,
    remote: bool,
    remote_peer: Option<&str>,
    is_old: bool,
) -> Result<Vec<Transaction>> {
    if !valid_block_timestamp(get_timestamp_seconds(), block) {
        return Err(NodeError::validation("invalid block timestamp"));
    }

    if is_old && memserver.config.quick_sync {
        // Deep history replay: the chain already vouched for these.
        return Ok(sort_transaction_pool(&block.block_transactions));
    }

    validate_transactions_in_block(stores, memserver, consensus, block, remote, remote_peer)
}

/// Applies an accepted block to every store. Must not fail: each step
/// retries storage errors until it lands.
fn incorporate_block(
    ctx: &NodeContext,
    block: &Block,
    sorted_transactions: &[Transaction],
    parent: &Block,
) {
    let stores = &ctx.stores;
    tracing::warn!("producing block");

    retry_forever("incorporate: index transactions", || {
        stores
            .transactions
            .index_transactions(block, sorted_transactions, &stores.accounts)
    });

    stores
        .blocks
        .update_child_in_latest_block(&block.block_hash, parent);

    retry_forever("incorporate: credit reward", || {
        stores
            .accounts
            .change_balance(&block.block_creator, block.block_reward as i128, false)
    });

    retry_forever("incorporate: credit produced", || {
        stores
            .accounts
            .increase_produced(&block.block_creator, block.block_reward as i128)
    });

    let totals = AccountStore::get_totals(block, false);
    retry_forever("incorporate: index totals", || {
        stores.accounts.index_totals(totals, block.block_number)
    });

    stores.blocks.save_block(block);
    stores.blocks.set_latest_block_info(block);

    ctx.metrics.blocks_incorporated.inc();
    ctx.metrics.block_height.set(block.block_number as i64);
}

/// Full acceptance pipeline for one block, local or remote.
///
/// Returns whether the sync caller may continue with the next block.
pub fn produce_block(
    ctx: &NodeContext,
    memserver: &mut MemServer,
    consensus: &mut Consensus,
    block: Block,
    remote: bool,
    remote_peer: Option<&str>,
) -> bool {
    let gen_start = get_timestamp_seconds();
    let now = gen_start;
    let is_old = block.is_old(now);

    let rebuilt = if remote {
        match rebuild_block(
            &ctx.stores.accounts,
            &block,
            &memserver.latest_block,
            memserver.block_time,
        ) {
            Ok(rebuilt) => rebuilt,
            Err(e) => {
                tracing::warn!("block production skipped, reconstruction failed: {e}");
                ctx.metrics.blocks_rejected.inc();
                if let Some(peer) = remote_peer {
                    consensus.change_trust(peer, -1000);
                }
                return false;
            }
        }
    } else {
        block
    };

    let parent = memserver.latest_block.clone();
    let sorted = match verify_block(
        &ctx.stores,
        memserver,
        consensus,
        &rebuilt,
        remote,
        remote_peer,
        is_old,
    ) {
        Ok(sorted) => sorted,
        Err(e) => {
            tracing::warn!("block production skipped due to: {e}");
            ctx.metrics.blocks_rejected.inc();
            return false;
        }
    };

    incorporate_block(ctx, &rebuilt, &sorted, &parent);
    memserver.latest_block = rebuilt.clone();

    if memserver.config.ip == rebuilt.block_ip
        && memserver.keydict.address == rebuilt.block_creator
        && rebuilt.block_reward > 0
    {
        tracing::warn!("$$$ Congratulations! You won! $$$");
    }

    let gen_elapsed = get_timestamp_seconds() - gen_start;
    ctx.metrics
        .block_production_seconds
        .observe(gen_elapsed as f64);

    tracing::warn!("block hash: {}", rebuilt.block_hash);
    tracing::warn!("block number: {}", rebuilt.block_number);
    tracing::warn!("winner IP: {}", rebuilt.block_ip);
    tracing::warn!("winner address: {}", rebuilt.block_creator);
    tracing::warn!("block reward: {}", to_readable_amount(rebuilt.block_reward));
    tracing::warn!(
        "transactions in block: {}",
        rebuilt.block_transactions.len()
    );
    tracing::warn!("remote block: {remote} ({remote_peer:?})");
    tracing::warn!("block size: {} bytes", rebuilt.byte_size());
    tracing::warn!("production time: {gen_elapsed}");
    tracing::warn!("old block: {is_old}");
    true
}

async fn replace_transaction_pool(ctx: &NodeContext) {
    let sync_from = {
        let mut memserver = ctx.memserver.lock().await;
        let consensus = ctx.consensus.lock().await;
        let pool = consensus.block_hash_pool.clone();
        get_peer_to_sync_from(&mut memserver, &consensus, &ctx.stores.peers, &pool)
    };
    let Some(peer) = sync_from else {
        return;
    };

    tracing::info!("replacing transaction_pool from {peer}");
    match ctx
        .gossip
        .get_from_single_target::<Vec<Transaction>>("transaction_pool", &peer)
        .await
    {
        Ok(suggested) => {
            let mut memserver = ctx.memserver.lock().await;
            memserver.transaction_pool = sort_transaction_pool(&suggested);
        }
        Err(e) => {
            tracing::info!("could not replace transaction_pool from {peer}: {e}");
            ctx.consensus.lock().await.change_trust(&peer, -10_000);
        }
    }
}

async fn replace_block_producers(ctx: &NodeContext) {
    let (sync_from, own_ip) = {
        let mut memserver = ctx.memserver.lock().await;
        let consensus = ctx.consensus.lock().await;
        let pool = consensus.block_hash_pool.clone();
        let own_ip = memserver.config.ip.clone();
        (
            get_peer_to_sync_from(&mut memserver, &consensus, &ctx.stores.peers, &pool),
            own_ip,
        )
    };
    let Some(peer) = sync_from else {
        return;
    };

    tracing::info!("replacing block_producers from {peer}");
    let suggested = match ctx
        .gossip
        .get_from_single_target::<Vec<String>>("block_producers", &peer)
        .await
    {
        Ok(suggested) => suggested,
        Err(e) => {
            tracing::info!("could not replace block_producers from {peer}: {e}");
            ctx.consensus.lock().await.change_trust(&peer, -10_000);
            return;
        }
    };

    if !suggested.contains(&own_ip) {
        // The source does not know us yet; introduce ourselves.
        tracing::info!("our node missing from producers suggested by {peer}, announcing");
        ctx.gossip
            .compound_announce_self(std::slice::from_ref(&peer), &own_ip)
            .await;
    }

    let replacements: Vec<String> = suggested
        .into_iter()
        .filter(|producer| {
            let stored = ctx.stores.peers.ip_stored(producer);
            if !stored {
                tracing::info!("{producer} not added to block producers, not locally stored");
            }
            stored
        })
        .collect();

    let mut memserver = ctx.memserver.lock().await;
    memserver.block_producers = replacements;
    memserver.block_producers.sort();
    memserver.block_producers.dedup();
    if let Err(e) = ctx
        .stores
        .blocks
        .save_block_producers(&memserver.block_producers)
    {
        tracing::warn!("could not persist block producers: {e}");
    }
}

async fn normal_mode(ctx: &NodeContext) {
    let periods = {
        let mut memserver = ctx.memserver.lock().await;
        update_periods(&mut memserver);

        let latest_number = memserver.latest_block.block_number;

        if memserver.periods.contains(&0) && !memserver.user_tx_buffer.is_empty() {
            let merged = merge_buffer(
                &memserver.user_tx_buffer,
                &memserver.tx_buffer,
                memserver.transaction_buffer_limit,
                latest_number,
                latest_number + USER_BUFFER_HORIZON,
            );
            memserver.user_tx_buffer = merged.from_buffer;
            memserver.tx_buffer = merged.to_buffer;
        }

        if memserver.periods.contains(&1) && !memserver.tx_buffer.is_empty() {
            let merged = merge_buffer(
                &memserver.tx_buffer,
                &memserver.transaction_pool,
                memserver.transaction_pool_limit,
                latest_number,
                latest_number + 1,
            );
            memserver.tx_buffer = merged.from_buffer;
            let limit = memserver.transaction_pool_limit;
            memserver.transaction_pool = cull_buffer(&merged.to_buffer, limit);
        }

        memserver.reported_uptime = memserver.get_uptime();
        memserver.periods.clone()
    };

    if periods.contains(&2) {
        let (tx_minority, producers_minority) = {
            let memserver = ctx.memserver.lock().await;
            let consensus = ctx.consensus.lock().await;
            (
                minority_consensus(
                    consensus.majority_transaction_pool_hash.as_deref(),
                    memserver.transaction_pool_hash.as_deref(),
                ),
                minority_consensus(
                    consensus.majority_block_producers_hash.as_deref(),
                    memserver.block_producers_hash.as_deref(),
                ),
            )
        };

        if tx_minority {
            // Last effort to rejoin the mempool majority before production.
            replace_transaction_pool(ctx).await;
        }
        if producers_minority {
            replace_block_producers(ctx).await;
        }
    }

    if periods.contains(&3) {
        let mut memserver = ctx.memserver.lock().await;
        let mut consensus = ctx.consensus.lock().await;

        let ready = memserver.peers.len() >= memserver.config.min_peers
            && !memserver.block_producers.is_empty()
            && memserver.force_sync_ip.is_none();

        if ready {
            let producers = memserver.block_producers.clone();
            let producers_hash = memserver.block_producers_hash.clone();
            let pool = memserver.transaction_pool.clone();
            let latest = memserver.latest_block.clone();

            match get_block_candidate(
                &ctx.stores.blocks,
                &ctx.stores.accounts,
                &ctx.stores.peers,
                &producers,
                producers_hash,
                &pool,
                &latest,
                memserver.block_time,
            ) {
                Ok((candidate, penalties)) => {
                    memserver.penalties = penalties;
                    produce_block(ctx, &mut memserver, &mut consensus, candidate, false, None);

                    let latest_number = memserver.latest_block.block_number;
                    memserver.transaction_pool =
                        remove_outdated_transactions(&memserver.transaction_pool, latest_number);
                    memserver.tx_buffer =
                        remove_outdated_transactions(&memserver.tx_buffer, latest_number);
                    memserver.user_tx_buffer =
                        remove_outdated_transactions(&memserver.user_tx_buffer, latest_number);
                }
                Err(e) => tracing::warn!("no block candidate this round: {e}"),
            }
        } else {
            tracing::warn!("criteria for block production not met");
        }
    }
}

/// Decides whether the node sits outside the majority chain.
fn minority_block_consensus(
    stores: &Stores,
    memserver: &MemServer,
    consensus: &Consensus,
) -> bool {
    let Some(majority) = consensus.majority_block_hash.as_deref() else {
        return false;
    };
    if stores.blocks.get_block(majority).is_some() && !memserver.peers.is_empty() {
        // Knowing the majority block means we are on (or ahead of) it.
        return false;
    }
    memserver.latest_block.block_hash != majority
}

async fn check_mode(ctx: &NodeContext) {
    let mut memserver = ctx.memserver.lock().await;
    let consensus = ctx.consensus.lock().await;

    if minority_block_consensus(&ctx.stores, &memserver, &consensus) {
        if !memserver.emergency_mode {
            tracing::warn!("we are out of consensus");
        }
        memserver.emergency_mode = true;
    } else if consensus.block_hash_pool_percentage >= 80.0 {
        // Back on the majority chain and the network agrees on it.
        memserver.emergency_mode = false;
        memserver.force_sync_ip = None;
    }
}

async fn emergency_mode(ctx: &NodeContext) {
    tracing::warn!("entering emergency mode");

    while !ctx.terminating() {
        {
            let memserver = ctx.memserver.lock().await;
            let consensus = ctx.consensus.lock().await;
            if !minority_block_consensus(&ctx.stores, &memserver, &consensus) {
                break;
            }
        }

        let peer = {
            let mut memserver = ctx.memserver.lock().await;
            let consensus = ctx.consensus.lock().await;
            let pool = consensus.block_hash_pool.clone();
            get_peer_to_sync_from(&mut memserver, &consensus, &ctx.stores.peers, &pool)
        };
        let Some(peer) = peer else {
            tracing::info!("could not find a suitably trusted peer");
            tokio::time::sleep(Duration::from_secs(1)).await;
            break;
        };

        let latest_hash = ctx.memserver.lock().await.latest_block.block_hash.clone();
        let known_block = ctx.gossip.knows_block(&peer, &latest_hash).await;

        if known_block {
            tracing::info!("{peer} knows block {latest_hash}");
            let new_blocks = match ctx.gossip.get_blocks_after(&peer, &latest_hash, SYNC_BATCH).await {
                Ok(blocks) => blocks,
                Err(e) => {
                    tracing::error!("failed to get blocks after {latest_hash} from {peer}: {e}");
                    ctx.consensus.lock().await.change_trust(&peer, -10_000);
                    break;
                }
            };
            if new_blocks.is_empty() {
                tracing::info!("no newer blocks found from {peer}");
                break;
            }

            // The whole batch replays under the buffer lock.
            let mut memserver = ctx.memserver.lock().await;
            let mut consensus = ctx.consensus.lock().await;
            for block in new_blocks {
                if ctx.terminating() {
                    break;
                }
                let uninterrupted = produce_block(
                    ctx,
                    &mut memserver,
                    &mut consensus,
                    block,
                    true,
                    Some(&peer),
                );
                if !uninterrupted {
                    break;
                }
                memserver.consecutive_sync_blocks += 1;
            }
        } else {
            let mut memserver = ctx.memserver.lock().await;
            if memserver.rollbacks <= memserver.config.max_rollbacks {
                match rollback_one_block(&ctx.stores, &memserver.latest_block.clone()) {
                    Ok(previous) => {
                        memserver.latest_block = previous;
                        memserver.rollbacks += 1;
                        ctx.metrics.rollbacks.inc();
                        ctx.consensus.lock().await.change_trust(&peer, -100_000);
                    }
                    Err(e) => {
                        tracing::error!("rollback refused: {e}");
                        break;
                    }
                }
            } else {
                tracing::error!("rollbacks exhausted");
                memserver.rollbacks = 0;
                break;
            }
        }

        let depth = ctx.memserver.lock().await.cascade_depth;
        tracing::info!("maximum reached cascade depth: {depth}");
    }
}

fn init_hashes(memserver: &mut MemServer) {
    memserver.transaction_pool_hash = memserver.get_transaction_pool_hash();
    memserver.block_producers_hash = memserver.get_block_producers_hash();
}

fn update_local_address(ctx: &NodeContext, memserver: &MemServer) {
    let own_ip = &memserver.config.ip;
    let new_address = &memserver.keydict.address;
    let stored = ctx
        .stores
        .peers
        .load_peer(own_ip)
        .map(|record| record.peer_address);
    if stored.as_deref() != Some(new_address.as_str()) {
        let updated = ctx
            .stores
            .peers
            .update_peer(own_ip, |record| record.peer_address = new_address.clone());
        if updated.is_ok() {
            tracing::info!("local address updated to {new_address}");
        }
    }
}

/// Refreshes the derived hashes after every cycle.
pub async fn refresh_consensus(ctx: &NodeContext) {
    let mut memserver = ctx.memserver.lock().await;
    let mut consensus = ctx.consensus.lock().await;

    memserver.transaction_pool_hash = memserver.get_transaction_pool_hash();
    memserver.block_producers_hash = memserver.get_block_producers_hash();
    memserver.since_last_block =
        get_timestamp_seconds().saturating_sub(memserver.latest_block.block_timestamp);
    consensus.refresh_hashes();
}

/// Entry point of the core worker.
pub async fn run(ctx: NodeContext) {
    tracing::info!("starting core");
    {
        let mut memserver = ctx.memserver.lock().await;
        init_hashes(&mut memserver);
        update_local_address(&ctx, &memserver);
    }

    while !ctx.terminating() {
        let start = get_timestamp_seconds();

        check_mode(&ctx).await;
        let emergency = ctx.memserver.lock().await.emergency_mode;
        if emergency {
            emergency_mode(&ctx).await;
        } else {
            normal_mode(&ctx).await;
        }

        refresh_consensus(&ctx).await;

        {
            let mut memserver = ctx.memserver.lock().await;
            memserver.core_duration = get_timestamp_seconds() - start;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    tracing::info!("core loop terminated");
}
