//! Privileged operator endpoints.
//!
//! `/force_sync` and `/terminate` require the server key, or a caller on
//! the loopback interface.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::encoding::forbidden;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct ForceSyncQuery {
    pub ip: String,
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TerminateQuery {
    pub key: Option<String>,
}

fn authorized(caller: &SocketAddr, key: Option<&str>, server_key: &str) -> bool {
    caller.ip().is_loopback() || key == Some(server_key)
}

/// `GET /force_sync?ip=&key=`
///
/// Pins the sync source to one IP until majority agreement recovers past
/// eighty percent.
pub async fn force_sync(
    State(state): State<GatewayState>,
    ConnectInfo(caller): ConnectInfo<SocketAddr>,
    Query(query): Query<ForceSyncQuery>,
) -> Response {
    let mut memserver = state.ctx.memserver.lock().await;

    if !authorized(&caller, query.key.as_deref(), &memserver.config.server_key) {
        return forbidden("Wrong server key");
    }
    if query.ip.parse::<std::net::Ipv4Addr>().is_err() {
        return forbidden("Invalid IP address");
    }

    tracing::warn!("sync source forced to {}", query.ip);
    memserver.force_sync_ip = Some(query.ip.clone());
    format!("Sync forced from {}", query.ip).into_response()
}

/// `GET /terminate?key=`
///
/// Graceful shutdown: flags the workers and rings the server's shutdown
/// handle.
pub async fn terminate(
    State(state): State<GatewayState>,
    ConnectInfo(caller): ConnectInfo<SocketAddr>,
    Query(query): Query<TerminateQuery>,
) -> Response {
    {
        let memserver = state.ctx.memserver.lock().await;
        if !authorized(&caller, query.key.as_deref(), &memserver.config.server_key) {
            return forbidden("Wrong server key");
        }
    }

    tracing::warn!("termination requested over HTTP");
    state.ctx.request_terminate();
    state.shutdown.notify_waiters();
    "Terminating..".into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_or_key_authorizes() {
        let local: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let remote: SocketAddr = "203.0.113.5:9999".parse().unwrap();

        assert!(authorized(&local, None, "secret"));
        assert!(authorized(&remote, Some("secret"), "secret"));
        assert!(!authorized(&remote, Some("wrong"), "secret"));
        assert!(!authorized(&remote, None, "secret"));
    }
}
