//! Account, supply and fee endpoints.

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use node::genesis::{GENESIS_ADDRESS, GENESIS_BALANCE};
use node::production::fee_over_blocks;
use node::types::to_readable_amount;

use crate::encoding::{forbidden, reply_value};
use crate::state::GatewayState;

use super::status::ReadQuery;

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub address: String,
    #[serde(default)]
    pub readable: bool,
    pub compress: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SupplyQuery {
    #[serde(default)]
    pub readable: bool,
    pub compress: Option<String>,
}

fn amount_json(raw: u64, readable: bool) -> serde_json::Value {
    if readable {
        serde_json::json!(to_readable_amount(raw))
    } else {
        serde_json::json!(raw)
    }
}

/// `GET /get_account?address=&readable=`
pub async fn get_account(
    State(state): State<GatewayState>,
    Query(query): Query<AccountQuery>,
) -> Response {
    let fetched = state
        .ctx
        .stores
        .accounts
        .get_account(&query.address, false)
        .ok()
        .flatten();

    let Some(account) = fetched else {
        return forbidden("Not found");
    };

    let body = serde_json::json!({
        "address": account.address,
        "balance": amount_json(account.balance, query.readable),
        "produced": amount_json(account.produced, query.readable),
        "burned": amount_json(account.burned, query.readable),
    });
    reply_value(&body, query.compress.as_deref())
}

/// `GET /get_supply?readable=`
///
/// Supply accounting derived from the totals aggregate and the genesis
/// reserve.
pub async fn get_supply(
    State(state): State<GatewayState>,
    Query(query): Query<SupplyQuery>,
) -> Response {
    let totals = match state.ctx.stores.accounts.fetch_totals() {
        Ok(totals) => totals,
        Err(e) => return forbidden(format!("Error: {e}")),
    };

    let reserve = state
        .ctx
        .stores
        .accounts
        .get_account(GENESIS_ADDRESS, false)
        .ok()
        .flatten()
        .map(|account| account.balance)
        .unwrap_or(0);

    let reserve_spent = GENESIS_BALANCE.saturating_sub(reserve);
    let circulating = (reserve_spent + totals.produced).saturating_sub(totals.burned);
    let total_supply = (GENESIS_BALANCE + totals.produced).saturating_sub(totals.burned);
    let block_number = state.ctx.memserver.lock().await.latest_block.block_number;

    let body = serde_json::json!({
        "produced": amount_json(totals.produced, query.readable),
        "fees": amount_json(totals.fees, query.readable),
        "burned": amount_json(totals.burned, query.readable),
        "reserve": amount_json(reserve, query.readable),
        "reserve_spent": amount_json(reserve_spent, query.readable),
        "circulating": amount_json(circulating, query.readable),
        "total_supply": amount_json(total_supply, query.readable),
        "block_number": block_number,
    });
    reply_value(&body, query.compress.as_deref())
}

/// `GET /get_recommended_fee`
///
/// Average fee of the latest block's transactions, plus one.
pub async fn get_recommended_fee(
    State(state): State<GatewayState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    let latest = state.ctx.memserver.lock().await.latest_block.clone();
    let fee = fee_over_blocks(&latest) + 1;
    let body = serde_json::json!({ "fee": fee });
    reply_value(&body, query.compress.as_deref())
}
