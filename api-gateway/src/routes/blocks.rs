//! Block lookup endpoints.
//!
//! Chain walks (`get_blocks_after` / `get_blocks_before`) follow the
//! child/parent links of the stored blocks, capped at one hundred per
//! request.

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use node::types::Block;

use crate::encoding::{not_found, reply_keyed, reply_value};
use crate::state::GatewayState;

use super::status::ReadQuery;

/// Hard cap on blocks returned by one walk.
const WALK_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct BlockHashQuery {
    pub hash: String,
    pub compress: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlockNumberQuery {
    pub number: u64,
    pub compress: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlockWalkQuery {
    pub hash: String,
    #[serde(default)]
    pub count: usize,
    pub compress: Option<String>,
}

/// `GET /get_latest_block`
pub async fn get_latest_block(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let latest = state.ctx.memserver.lock().await.latest_block.clone();
    reply_value(&latest, query.compress.as_deref())
}

/// `GET /get_block?hash=`
pub async fn get_block(
    State(state): State<GatewayState>,
    Query(query): Query<BlockHashQuery>,
) -> Response {
    match state.ctx.stores.blocks.get_block(&query.hash) {
        Some(block) => reply_value(&block, query.compress.as_deref()),
        None => not_found(),
    }
}

/// `GET /get_block_number?number=`
pub async fn get_block_number(
    State(state): State<GatewayState>,
    Query(query): Query<BlockNumberQuery>,
) -> Response {
    match state.ctx.stores.blocks.get_block_by_number(query.number) {
        Some(block) => reply_value(&block, query.compress.as_deref()),
        None => not_found(),
    }
}

/// `GET /get_blocks_after?hash=&count=`
///
/// Walks child pointers forward from (but excluding) `hash`.
pub async fn get_blocks_after(
    State(state): State<GatewayState>,
    Query(query): Query<BlockWalkQuery>,
) -> Response {
    let count = query.count.clamp(1, WALK_LIMIT);

    let Some(start) = state.ctx.stores.blocks.get_block(&query.hash) else {
        return not_found();
    };

    let mut collected: Vec<Block> = Vec::new();
    let mut cursor = start.child_hash;
    while let Some(child_hash) = cursor {
        let Some(block) = state.ctx.stores.blocks.get_block(&child_hash) else {
            break;
        };
        cursor = block.child_hash.clone();
        collected.push(block);
        if collected.len() >= count {
            break;
        }
    }

    if collected.is_empty() {
        return not_found();
    }
    reply_keyed("blocks_after", &collected, query.compress.as_deref())
}

/// `GET /get_blocks_before?hash=&count=`
///
/// Walks parent pointers backwards, answering in chain order.
pub async fn get_blocks_before(
    State(state): State<GatewayState>,
    Query(query): Query<BlockWalkQuery>,
) -> Response {
    let count = query.count.clamp(1, WALK_LIMIT);

    let Some(start) = state.ctx.stores.blocks.get_block(&query.hash) else {
        return not_found();
    };

    let mut collected: Vec<Block> = Vec::new();
    let mut cursor = start.parent_hash;
    while let Some(parent_hash) = cursor {
        let Some(block) = state.ctx.stores.blocks.get_block(&parent_hash) else {
            break;
        };
        cursor = block.parent_hash.clone();
        collected.push(block);
        if collected.len() >= count {
            break;
        }
    }

    if collected.is_empty() {
        return not_found();
    }
    collected.reverse();
    reply_keyed("blocks_before", &collected, query.compress.as_deref())
}

/// `GET /get_producer_set_from_hash?hash=`
pub async fn get_producer_set(
    State(state): State<GatewayState>,
    Query(query): Query<BlockHashQuery>,
) -> Response {
    match state.ctx.stores.peers.get_producer_set(&query.hash) {
        Some(set) => reply_value(&set, query.compress.as_deref()),
        None => crate::encoding::forbidden("Not found"),
    }
}
