//! Rollback: the exact inverse of block incorporation.
//!
//! Applied when the network majority sits on a chain we are not on.
//! Rolling one block back restores the parent as latest, refunds the
//! creator's reward and produced counter, reverts the totals, reverses
//! every transaction's account effects and drops the block from both the
//! index and the disk. Transient storage errors retry until the rollback
//! lands; only a missing parent (genesis) refuses.

use crate::error::{NodeError, Result};
use crate::storage::{Stores, retry_forever};
use crate::types::Block;

/// Rolls the chain back by one block and returns the new latest block.
pub fn rollback_one_block(stores: &Stores, block: &Block) -> Result<Block> {
    let parent_hash = block
        .parent_hash
        .as_deref()
        .ok_or_else(|| NodeError::invariant("cannot roll back past genesis"))?;

    let previous_block = retry_forever("rollback: load parent", || {
        stores.blocks.load_block(parent_hash)
    });

    stores.blocks.set_latest_block_info(&previous_block);

    retry_forever("rollback: revert reward", || {
        stores
            .accounts
            .change_balance(&block.block_creator, -(block.block_reward as i128), false)
    });

    retry_forever("rollback: revert produced", || {
        stores
            .accounts
            .increase_produced(&block.block_creator, -(block.block_reward as i128))
    });

    let totals = crate::storage::AccountStore::get_totals(block, true);
    retry_forever("rollback: revert totals", || {
        stores.accounts.index_totals(totals, block.block_number)
    });

    retry_forever("rollback: unindex transactions", || {
        stores.transactions.unindex_transactions(block, &stores.accounts)
    });

    stores.blocks.unindex_block(block);

    tracing::info!("rolled back {} successfully", block.block_hash);
    Ok(previous_block)
}
