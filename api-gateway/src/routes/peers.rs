//! Peer announcement endpoint.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use node::storage::check_ip;
use node::types::PeerRecord;

use crate::encoding::forbidden;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct AnnounceQuery {
    pub ip: String,
}

/// `GET /announce_peer?ip=`
///
/// Validates the IP, probes the peer for its address, saves it to the
/// registry and buffers it for inclusion. During the production period
/// new peers wait in the buffer so the linked set stays stable.
pub async fn announce_peer(
    State(state): State<GatewayState>,
    Query(query): Query<AnnounceQuery>,
) -> Response {
    let peer_ip = query.ip;

    let (own_ip, port, already_known, producing) = {
        let memserver = state.ctx.memserver.lock().await;
        (
            memserver.config.ip.clone(),
            memserver.config.port,
            memserver.peers.contains(&peer_ip),
            memserver.periods.contains(&3),
        )
    };

    if !check_ip(&peer_ip, &own_ip) {
        return forbidden("Cannot add this address");
    }

    if already_known {
        return format!("Peer {peer_ip} is known or invalid").into_response();
    }

    // The announcement is only as good as the peer's reachability.
    let status = match state.ctx.gossip.get_remote_status(&peer_ip).await {
        Ok(status) => status,
        Err(e) => return forbidden(format!("Error: {e}")),
    };

    let record = PeerRecord::new(peer_ip.clone(), port, status.address);
    if let Err(e) = state.ctx.stores.peers.save_peer(&record, false) {
        return forbidden(format!("Error: {e}"));
    }

    {
        let mut memserver = state.ctx.memserver.lock().await;
        memserver.unreachable.remove(&peer_ip);

        let buffered = memserver.peer_buffer.contains(&peer_ip);
        if !memserver.peers.contains(&peer_ip) && !buffered {
            if producing {
                memserver.peer_buffer.push(peer_ip.clone());
                memserver.peer_buffer.sort();
                memserver.peer_buffer.dedup();
            } else {
                memserver.peers.push(peer_ip.clone());
                memserver.peers.sort();
            }
        }
    }

    format!("Peer {peer_ip} added").into_response()
}
