//! Peer loop: discovery, purging, bans and the status pool.
//!
//! Once a second: make sure we have enough reachable peers, sniff the
//! peers of our peers (and the announce buffer) into the linked set,
//! apply the purge list during the merge periods, lift expired bans, run
//! the heavy refresh (announce, persist, re-detect our public IP) on its
//! own interval and rebuild the status pool.

use std::time::Duration;

use crate::config::get_timestamp_seconds;
use crate::context::NodeContext;
use crate::gossip::GossipClient;
use crate::storage::{PeerStore, check_ip};
use crate::types::{PeerRecord, Transaction};

/// Seconds between heavy refreshes (announce, persist, IP re-detection).
pub const HEAVY_REFRESH_INTERVAL: u64 = 360;

/// Bans lift after half a heavy-refresh interval.
const BAN_SECONDS: u64 = HEAVY_REFRESH_INTERVAL / 2;

/// Probe batch size when reloading peers from disk.
const PROBE_CHUNK: usize = 10;

/// Loads stored peers by descending trust and probes them in chunks until
/// `minimum` reachable ones are confirmed. Returns only reachable IPs.
pub async fn load_ips(
    registry: &PeerStore,
    gossip: &GossipClient,
    fail_storage: &mut Vec<String>,
    minimum: usize,
) -> Vec<String> {
    let candidates: Vec<String> = registry
        .list_by_trust()
        .into_iter()
        .map(|record| record.peer_ip)
        .filter(|ip| !fail_storage.contains(ip))
        .take(50)
        .collect();
    let minimum = minimum.min(candidates.len());

    let mut reachable: Vec<String> = Vec::new();
    for chunk in candidates.chunks(PROBE_CHUNK) {
        tracing::info!("testing {chunk:?}");
        let outcome = gossip.compound_get_status_pool(chunk).await;

        reachable.extend(outcome.fetched.into_keys());
        for failed in outcome.failed {
            if !fail_storage.contains(&failed) {
                fail_storage.push(failed);
            }
        }

        tracing::info!(
            "gathered {}/{minimum} peers, {} failed",
            reachable.len(),
            fail_storage.len()
        );
        if reachable.len() >= minimum {
            break;
        }
    }

    reachable.sort();
    reachable
}

/// Applies the purge list: drop from the linked set and the producer set,
/// stamp the ban, penalize cached trust and forget consensus opinions.
async fn purge_peers(ctx: &NodeContext) {
    let mut memserver = ctx.memserver.lock().await;
    let mut consensus = ctx.consensus.lock().await;

    let drained: Vec<String> = std::mem::take(&mut memserver.purge_peers_list);
    let now = get_timestamp_seconds();

    for entry in drained {
        memserver.peers.retain(|peer| peer != &entry);
        memserver.block_producers.retain(|peer| peer != &entry);
        memserver.unreachable.entry(entry.clone()).or_insert(now);

        consensus.change_trust(&entry, -1000);
        consensus.forget_peer(&entry);
    }
}

/// Pulls the peers-of-peers and the announce buffer into the linked set,
/// and promotes locally-stored peers to block producers.
async fn sniff_peers_and_producers(ctx: &NodeContext) {
    let (peers, own_ip, peer_limit) = {
        let memserver = ctx.memserver.lock().await;
        (
            memserver.peers.clone(),
            memserver.config.ip.clone(),
            memserver.config.peer_limit,
        )
    };

    let outcome = ctx
        .gossip
        .compound_get_list_of::<String>("peers", &peers, true)
        .await;

    let mut memserver = ctx.memserver.lock().await;
    for failed in outcome.failed {
        memserver.schedule_purge(&failed);
    }

    let buffered: Vec<String> = std::mem::take(&mut memserver.peer_buffer);
    for candidate in outcome.fetched.into_iter().chain(buffered) {
        if !check_ip(&candidate, &own_ip) || memserver.unreachable.contains_key(&candidate) {
            continue;
        }

        if !memserver.peers.contains(&candidate) && memserver.peers.len() < peer_limit {
            tracing::info!("{candidate} connected");
            memserver.peers.push(candidate.clone());
            memserver.peers.sort();
        }

        if !memserver.block_producers.contains(&candidate)
            && ctx.stores.peers.ip_stored(&candidate)
        {
            tracing::warn!("added {candidate} to block producers");
            memserver.block_producers.push(candidate.clone());
            let _ = ctx.stores.peers.update_peer(&candidate, |_| {});
        }
    }

    memserver.block_producers.sort();
    memserver.block_producers.dedup();
    let producers = memserver.block_producers.clone();
    drop(memserver);

    if let Err(e) = ctx.stores.peers.store_producer_set(&producers) {
        tracing::warn!("could not store producer set: {e}");
    }
    if let Err(e) = ctx.stores.blocks.save_block_producers(&producers) {
        tracing::warn!("could not save block producers: {e}");
    }
}

/// Merges the transaction pools and buffers of every peer into ours.
async fn merge_remote_transactions(ctx: &NodeContext) {
    let peers = ctx.memserver.lock().await.peers.clone();

    for key in ["transaction_pool", "transaction_buffer"] {
        let outcome = ctx
            .gossip
            .compound_get_list_of::<Transaction>(key, &peers, true)
            .await;

        let mut memserver = ctx.memserver.lock().await;
        for failed in outcome.failed {
            memserver.schedule_purge(&failed);
        }
        memserver.merge_transactions(&ctx.stores, outcome.fetched, false);
    }
}

/// Probes and saves newly-seen peers to the registry.
async fn check_save_peers(ctx: &NodeContext) {
    let (peers, own_ip, port) = {
        let memserver = ctx.memserver.lock().await;
        let unbanned: Vec<String> = memserver
            .peers
            .iter()
            .filter(|peer| !memserver.unreachable.contains_key(*peer))
            .cloned()
            .collect();
        (unbanned, memserver.config.ip.clone(), memserver.config.port)
    };

    let outcome = ctx.gossip.compound_get_status_pool(&peers).await;
    for (ip, status) in outcome.fetched {
        if !ctx.stores.peers.ip_stored(&ip) && check_ip(&ip, &own_ip) {
            let record = PeerRecord::new(ip, port, status.address);
            if let Err(e) = ctx.stores.peers.save_peer(&record, false) {
                tracing::warn!("could not save peer: {e}");
            }
        }
    }

    let mut memserver = ctx.memserver.lock().await;
    for failed in outcome.failed {
        memserver.schedule_purge(&failed);
    }
}

/// The expensive once-per-interval work: announce, persist, re-detect.
async fn heavy_refresh(ctx: &NodeContext) {
    let (producers, own_ip) = {
        let memserver = ctx.memserver.lock().await;
        (
            memserver.block_producers.clone(),
            memserver.config.ip.clone(),
        )
    };

    let outcome = ctx.gossip.compound_announce_self(&producers, &own_ip).await;
    {
        let mut memserver = ctx.memserver.lock().await;
        for failed in outcome.failed {
            memserver.schedule_purge(&failed);
        }
    }

    check_save_peers(ctx).await;

    {
        let consensus = ctx.consensus.lock().await;
        ctx.stores.peers.dump_trust(&consensus.trust_pool);
    }

    // Our address may have moved; keep the config and self-record current.
    if let Ok(public_ip) = ctx.gossip.get_public_ip().await {
        let mut memserver = ctx.memserver.lock().await;
        if memserver.config.ip != public_ip {
            tracing::info!("local IP updated to {public_ip}");
            if let Some(me) = ctx.stores.peers.load_peer(&memserver.config.ip) {
                let moved = PeerRecord {
                    peer_ip: public_ip.clone(),
                    ..me
                };
                let _ = ctx.stores.peers.save_peer(&moved, true);
            }
            memserver.config.ip = public_ip;
            let _ = memserver.config.save(&ctx.home);
        }
    }

    // Self-reachability probe: only an open port can win blocks.
    let own_ip = ctx.memserver.lock().await.config.ip.clone();
    let can_mine = ctx.gossip.get_remote_status(&own_ip).await.is_ok();
    ctx.memserver.lock().await.can_mine = can_mine;
}

/// Rebuilds the status pool, purging peers on older protocols.
async fn refresh_status_pool(ctx: &NodeContext) {
    let (peers, local_protocol) = {
        let memserver = ctx.memserver.lock().await;
        (memserver.peers.clone(), memserver.config.protocol)
    };

    let outcome = ctx.gossip.compound_get_status_pool(&peers).await;

    let mut memserver = ctx.memserver.lock().await;
    let mut consensus = ctx.consensus.lock().await;

    for failed in outcome.failed {
        memserver.schedule_purge(&failed);
    }

    let mut status_pool = std::collections::HashMap::new();
    for (ip, status) in outcome.fetched {
        if status.protocol < local_protocol {
            tracing::info!("{ip} runs protocol {}, purging", status.protocol);
            memserver.schedule_purge(&ip);
            continue;
        }
        status_pool.insert(ip, status);
    }
    consensus.status_pool = status_pool;
}

async fn cycle(ctx: &NodeContext, heavy_refresh_at: &mut u64) {
    let (peer_count, min_peers, periods) = {
        let memserver = ctx.memserver.lock().await;
        (
            memserver.peers.len(),
            memserver.config.min_peers,
            memserver.periods.clone(),
        )
    };

    if peer_count < min_peers {
        tracing::info!("not enough peers, reloading from drive");
        let mut fails;
        {
            let mut memserver = ctx.memserver.lock().await;
            memserver.unreachable.clear();
            fails = std::mem::take(&mut memserver.purge_peers_list);
        }
        let loaded = load_ips(&ctx.stores.peers, &ctx.gossip, &mut fails, min_peers).await;
        let mut memserver = ctx.memserver.lock().await;
        memserver.peers = loaded;
        memserver.purge_peers_list = fails;
    }

    if periods.contains(&0) || periods.contains(&1) {
        purge_peers(ctx).await;
        merge_remote_transactions(ctx).await;
        sniff_peers_and_producers(ctx).await;
    }

    {
        let mut memserver = ctx.memserver.lock().await;
        let now = get_timestamp_seconds();
        let expired: Vec<String> = memserver
            .unreachable
            .iter()
            .filter(|(_, banned_at)| now.saturating_sub(**banned_at) > BAN_SECONDS)
            .map(|(ip, _)| ip.clone())
            .collect();
        for ip in expired {
            memserver.unreachable.remove(&ip);
            tracing::info!("restored {ip}, banned for too long");
        }
    }

    let now = get_timestamp_seconds();
    if now > *heavy_refresh_at + HEAVY_REFRESH_INTERVAL {
        *heavy_refresh_at = now;
        heavy_refresh(ctx).await;
    }

    refresh_status_pool(ctx).await;
}

/// Entry point of the peer worker.
pub async fn run(ctx: NodeContext) {
    tracing::info!("starting peer client");
    let mut heavy_refresh_at: u64 = 0;

    while !ctx.terminating() {
        let start = get_timestamp_seconds();
        cycle(&ctx, &mut heavy_refresh_at).await;
        {
            let mut memserver = ctx.memserver.lock().await;
            memserver.peer_duration = get_timestamp_seconds() - start;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    tracing::info!("peer loop terminated");
}
