//! Read endpoints over the in-memory collections.

use axum::extract::{Query, State};
use axum::response::Response;

use crate::encoding::reply_keyed;
use crate::state::GatewayState;

use super::status::ReadQuery;

/// `GET /transaction_pool`
pub async fn transaction_pool(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let pool = state.ctx.memserver.lock().await.transaction_pool.clone();
    reply_keyed("transaction_pool", &pool, query.compress.as_deref())
}

/// `GET /transaction_buffer`
pub async fn transaction_buffer(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let buffer = state.ctx.memserver.lock().await.tx_buffer.clone();
    reply_keyed("transaction_buffer", &buffer, query.compress.as_deref())
}

/// `GET /user_transaction_buffer`
pub async fn user_transaction_buffer(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let buffer = state.ctx.memserver.lock().await.user_tx_buffer.clone();
    reply_keyed(
        "user_transaction_buffer",
        &buffer,
        query.compress.as_deref(),
    )
}

/// `GET /peers`
pub async fn peers(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let peers = state.ctx.memserver.lock().await.peers.clone();
    reply_keyed("peers", &peers, query.compress.as_deref())
}

/// `GET /peer_buffer`
pub async fn peer_buffer(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let buffer = state.ctx.memserver.lock().await.peer_buffer.clone();
    reply_keyed("peer_buffer", &buffer, query.compress.as_deref())
}

/// `GET /block_producers`
pub async fn block_producers(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let producers = state.ctx.memserver.lock().await.block_producers.clone();
    reply_keyed("block_producers", &producers, query.compress.as_deref())
}

/// `GET /unreachable`
pub async fn unreachable(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let unreachable = state.ctx.memserver.lock().await.unreachable.clone();
    reply_keyed("unreachable", &unreachable, query.compress.as_deref())
}

/// `GET /penalties`
pub async fn penalties(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let penalties = state.ctx.memserver.lock().await.penalties.clone();
    reply_keyed("penalties", &penalties, query.compress.as_deref())
}

/// `GET /trust_pool`
pub async fn trust_pool(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let trust = state.ctx.consensus.lock().await.trust_pool.clone();
    reply_keyed("trust_pool", &trust, query.compress.as_deref())
}

/// `GET /status_pool`
pub async fn status_pool(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let pool = state.ctx.consensus.lock().await.status_pool.clone();
    reply_keyed("status_pool", &pool, query.compress.as_deref())
}
