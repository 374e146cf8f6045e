// api-gateway/src/main.rs

//! NADO node binary.
//!
//! Wires the node library into a running process:
//!
//! - first-start bootstrap (folders, genesis, keys, config),
//! - the four worker loops (peer, consensus, core, message),
//! - and the HTTP surface other nodes gossip against.

mod encoding;
mod routes;
mod state;

use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::signal;

use node::genesis::{
    GENESIS_ADDRESS, GENESIS_BALANCE, GENESIS_IP, GENESIS_TIMESTAMP, ensure_keys, genesis_found,
    make_folders, make_genesis,
};
use node::{GossipClient, MemServer, NodeConfig, NodeContext, NodeMetrics, Stores};

use routes::{accounts, blocks, control, peers, pools, status, transactions};
use state::GatewayState;

#[tokio::main]
async fn main() {
    // Basic tracing setup.
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "api_gateway=info,node=info".to_string()),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let home = node::get_home();
    make_folders(&home).map_err(|e| format!("cannot create node home: {e}"))?;

    // ---------------------------
    // Configuration
    // ---------------------------

    let bootstrap_gossip =
        GossipClient::new(9173).map_err(|e| format!("cannot build gossip client: {e}"))?;
    let public_ip = match bootstrap_gossip.get_public_ip().await {
        Ok(ip) => ip,
        Err(e) => {
            tracing::warn!("public IP discovery failed ({e}), falling back to loopback");
            "127.0.0.1".to_string()
        }
    };

    let config = NodeConfig::load_or_create(&home, public_ip)
        .map_err(|e| format!("cannot load config: {e}"))?;

    // ---------------------------
    // Storage + first-start bootstrap
    // ---------------------------

    let stores = Stores::open(&home, config.legacy_fee_height)
        .map_err(|e| format!("cannot open stores: {e}"))?;

    if !genesis_found(&home) {
        make_genesis(
            &stores,
            GENESIS_ADDRESS,
            GENESIS_BALANCE,
            GENESIS_IP,
            config.port,
            GENESIS_TIMESTAMP,
        )
        .map_err(|e| format!("cannot install genesis: {e}"))?;
        tracing::info!("genesis installed");
    }

    let keydict = ensure_keys(&home, &stores, &config.ip, config.port)
        .map_err(|e| format!("cannot load keys: {e}"))?;

    // ---------------------------
    // Shared state
    // ---------------------------

    let latest_block = stores
        .blocks
        .get_latest_block()
        .map_err(|e| format!("cannot load latest block: {e}"))?;
    let earliest_block_hash = stores
        .blocks
        .get_block_ends()
        .map(|ends| ends.earliest_block)
        .unwrap_or_else(|| latest_block.block_hash.clone());

    let mut block_producers = stores.blocks.load_block_producers();
    // A one-node network must still see itself.
    if !block_producers.contains(&config.ip) {
        block_producers.push(config.ip.clone());
    }

    let mut memserver = MemServer::new(
        config.clone(),
        keydict,
        latest_block,
        earliest_block_hash,
        block_producers,
    );
    if !memserver.peers.contains(&config.ip) {
        memserver.peers.push(config.ip.clone());
    }

    let gossip =
        GossipClient::new(config.port).map_err(|e| format!("cannot build gossip client: {e}"))?;
    let metrics = NodeMetrics::new().map_err(|e| format!("cannot build metrics: {e}"))?;

    let ctx = NodeContext::new(memserver, stores, gossip, metrics, home);
    let app_state = GatewayState::new(ctx.clone());

    // ---------------------------
    // Worker loops
    // ---------------------------

    let workers = node::loops::spawn_all(&ctx);

    // ---------------------------
    // HTTP router
    // ---------------------------

    let app = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/metrics", get(status::metrics))
        .route("/transaction_pool", get(pools::transaction_pool))
        .route("/transaction_buffer", get(pools::transaction_buffer))
        .route(
            "/user_transaction_buffer",
            get(pools::user_transaction_buffer),
        )
        .route("/peers", get(pools::peers))
        .route("/peer_buffer", get(pools::peer_buffer))
        .route("/block_producers", get(pools::block_producers))
        .route("/trust_pool", get(pools::trust_pool))
        .route("/status_pool", get(pools::status_pool))
        .route("/unreachable", get(pools::unreachable))
        .route("/penalties", get(pools::penalties))
        .route("/get_latest_block", get(blocks::get_latest_block))
        .route("/get_block", get(blocks::get_block))
        .route("/get_block_number", get(blocks::get_block_number))
        .route("/get_blocks_after", get(blocks::get_blocks_after))
        .route("/get_blocks_before", get(blocks::get_blocks_before))
        .route(
            "/get_producer_set_from_hash",
            get(blocks::get_producer_set),
        )
        .route("/get_account", get(accounts::get_account))
        .route("/get_supply", get(accounts::get_supply))
        .route("/get_recommended_fee", get(accounts::get_recommended_fee))
        .route("/get_transaction", get(transactions::get_transaction))
        .route(
            "/get_transactions_of_account",
            get(transactions::get_transactions_of_account),
        )
        .route("/submit_transaction", get(transactions::submit_transaction))
        .route("/announce_peer", get(peers::announce_peer))
        .route("/force_sync", get(control::force_sync))
        .route("/terminate", get(control::terminate))
        .with_state(app_state.clone());

    // ---------------------------
    // axum 0.8 server with graceful shutdown
    // ---------------------------

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .map_err(|e| format!("invalid listen address: {e}"))?;

    tracing::info!("request handler listening on http://{listen_addr}");

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| format!("failed to bind {listen_addr}: {e}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(app_state))
    .await
    .map_err(|e| format!("server error: {e}"))?;

    // Give the workers their termination cycle.
    ctx.request_terminate();
    for worker in workers {
        worker.abort();
    }
    tracing::info!("termination code reached, bye");
    Ok(())
}

/// Resolves on Ctrl-C or an authorized `/terminate` call.
async fn shutdown_signal(state: GatewayState) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = state.shutdown.notified() => {
            tracing::info!("shutdown requested over HTTP");
        }
    }
    state.ctx.request_terminate();
}
