//! Transaction submission and lookup endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use node::types::Transaction;

use crate::encoding::{forbidden, reply_value};
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    /// URL-encoded JSON transaction.
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct TxidQuery {
    pub txid: String,
    pub compress: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccountTxQuery {
    pub address: String,
    #[serde(default)]
    pub min_block: u64,
    pub compress: Option<String>,
}

/// `GET /submit_transaction?data=<url-encoded json tx>`
///
/// Admits a user transaction through the full merge gauntlet; the answer
/// carries the verdict, 403 on rejection.
pub async fn submit_transaction(
    State(state): State<GatewayState>,
    Query(query): Query<SubmitQuery>,
) -> Response {
    let transaction: Transaction = match serde_json::from_str(&query.data) {
        Ok(transaction) => transaction,
        Err(e) => {
            return forbidden(format!(
                "Invalid transaction structure on submission attempt: {e}"
            ));
        }
    };

    let outcome = {
        let mut memserver = state.ctx.memserver.lock().await;
        memserver.merge_transaction(&state.ctx.stores, transaction, true)
    };

    let status = if outcome.result {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    (status, axum::Json(outcome)).into_response()
}

/// `GET /get_transaction?txid=`
pub async fn get_transaction(
    State(state): State<GatewayState>,
    Query(query): Query<TxidQuery>,
) -> Response {
    match state
        .ctx
        .stores
        .transactions
        .get_transaction(&query.txid, &state.ctx.stores.blocks)
    {
        Some(transaction) => reply_value(&transaction, query.compress.as_deref()),
        None => forbidden("Not found"),
    }
}

/// `GET /get_transactions_of_account?address=&min_block=`
///
/// One hundred blocks of history, keyed by the scanned range.
pub async fn get_transactions_of_account(
    State(state): State<GatewayState>,
    Query(query): Query<AccountTxQuery>,
) -> Response {
    match state.ctx.stores.transactions.get_transactions_of_account(
        &query.address,
        query.min_block,
        &state.ctx.stores.blocks,
    ) {
        Ok(page) => reply_value(&page, query.compress.as_deref()),
        Err(e) => forbidden(format!("Error: {e}")),
    }
}
