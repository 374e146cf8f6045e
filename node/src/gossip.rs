//! Gossip client: bounded fan-out over plain HTTP GETs.
//!
//! The `compound_*` primitives issue one request per peer, all sharing a
//! semaphore of fifty in-flight requests and a five-second timeout. A peer
//! that fails lands in the returned failure list exactly once; survivors
//! carry the round. Responses are JSON (`{"key": value}` envelopes) or,
//! with `?compress=msgpack`, raw MessagePack of the value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{NodeError, Result};
use crate::types::{Block, StatusReport, Transaction};

/// Concurrent in-flight gossip requests.
pub const FANOUT_PERMITS: usize = 50;

/// Per-request timeout.
pub const GOSSIP_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a fan-out round.
pub struct FanOut<T> {
    pub fetched: T,
    /// Peers that did not answer; each appears once.
    pub failed: Vec<String>,
}

/// Shared HTTP gossip client; cheap to clone.
#[derive(Clone)]
pub struct GossipClient {
    client: reqwest::Client,
    port: u16,
    semaphore: Arc<Semaphore>,
}

impl GossipClient {
    pub fn new(port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(GOSSIP_TIMEOUT)
            .build()
            .map_err(|e| NodeError::Fatal(format!("cannot build gossip client: {e}")))?;
        Ok(GossipClient {
            client,
            port,
            semaphore: Arc::new(Semaphore::new(FANOUT_PERMITS)),
        })
    }

    fn url(&self, peer: &str, path: &str) -> String {
        format!("http://{peer}:{}/{path}", self.port)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| NodeError::NetworkTimeout("gossip semaphore closed".into()))?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(NodeError::NetworkTimeout(format!(
                "{url} answered {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Fetches a keyed collection from one peer.
    ///
    /// MessagePack responses are the bare value; JSON responses carry the
    /// `{"key": value}` envelope.
    pub async fn get_list_of<T: DeserializeOwned>(
        &self,
        key: &str,
        peer: &str,
        msgpack: bool,
    ) -> Result<Vec<T>> {
        if msgpack {
            let bytes = self
                .fetch_bytes(&self.url(peer, &format!("{key}?compress=msgpack")))
                .await?;
            Ok(rmp_serde::from_slice(&bytes)?)
        } else {
            let bytes = self.fetch_bytes(&self.url(peer, key)).await?;
            let mut envelope: serde_json::Value = serde_json::from_slice(&bytes)?;
            let value = envelope
                .get_mut(key)
                .map(serde_json::Value::take)
                .ok_or_else(|| NodeError::validation(format!("{peer} answer missing {key}")))?;
            Ok(serde_json::from_value(value)?)
        }
    }

    /// Fan-out version of [`GossipClient::get_list_of`]: the union of all
    /// answers, deduplicated, plus the failed peers.
    pub async fn compound_get_list_of<T>(
        &self,
        key: &str,
        peers: &[String],
        msgpack: bool,
    ) -> FanOut<Vec<T>>
    where
        T: DeserializeOwned + PartialEq + Send + 'static,
    {
        let mut set: JoinSet<(String, Result<Vec<T>>)> = JoinSet::new();
        for peer in peers {
            let this = self.clone();
            let peer = peer.clone();
            let key = key.to_string();
            set.spawn(async move {
                let fetched = this.get_list_of::<T>(&key, &peer, msgpack).await;
                (peer, fetched)
            });
        }

        let mut fetched: Vec<T> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        while let Some(joined) = set.join_next().await {
            let Ok((peer, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(items) => {
                    for item in items {
                        if !fetched.contains(&item) {
                            fetched.push(item);
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!("compounder: {key} of {peer} failed: {e}");
                    if !failed.contains(&peer) {
                        failed.push(peer);
                    }
                }
            }
        }
        FanOut { fetched, failed }
    }

    /// Status of one peer.
    pub async fn get_remote_status(&self, peer: &str) -> Result<StatusReport> {
        let bytes = self.fetch_bytes(&self.url(peer, "status")).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Status of every peer, keyed by IP, plus the failed ones.
    pub async fn compound_get_status_pool(
        &self,
        peers: &[String],
    ) -> FanOut<HashMap<String, StatusReport>> {
        let mut set: JoinSet<(String, Result<StatusReport>)> = JoinSet::new();
        for peer in peers {
            let this = self.clone();
            let peer = peer.clone();
            set.spawn(async move {
                let status = this.get_remote_status(&peer).await;
                (peer, status)
            });
        }

        let mut fetched = HashMap::new();
        let mut failed = Vec::new();
        while let Some(joined) = set.join_next().await {
            let Ok((peer, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(status) => {
                    fetched.insert(peer, status);
                }
                Err(e) => {
                    tracing::debug!("compounder: status of {peer} failed: {e}");
                    if !failed.contains(&peer) {
                        failed.push(peer);
                    }
                }
            }
        }
        FanOut { fetched, failed }
    }

    /// Announces our IP to every target.
    pub async fn compound_announce_self(&self, peers: &[String], my_ip: &str) -> FanOut<usize> {
        let mut set: JoinSet<(String, Result<Vec<u8>>)> = JoinSet::new();
        for peer in peers {
            let this = self.clone();
            let peer = peer.clone();
            let url = self.url(&peer, &format!("announce_peer?ip={my_ip}"));
            set.spawn(async move { (peer, this.fetch_bytes(&url).await) });
        }

        let mut reached = 0;
        let mut failed = Vec::new();
        while let Some(joined) = set.join_next().await {
            let Ok((peer, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(_) => reached += 1,
                Err(_) => {
                    if !failed.contains(&peer) {
                        failed.push(peer);
                    }
                }
            }
        }
        FanOut {
            fetched: reached,
            failed,
        }
    }

    /// Submits a transaction to every peer; counts acceptances.
    pub async fn compound_send_transaction(
        &self,
        peers: &[String],
        transaction: &Transaction,
    ) -> FanOut<usize> {
        let encoded: String = {
            let raw = serde_json::to_string(transaction).unwrap_or_default();
            url_encode(&raw)
        };

        let mut set: JoinSet<(String, Result<Vec<u8>>)> = JoinSet::new();
        for peer in peers {
            let this = self.clone();
            let peer = peer.clone();
            let url = self.url(&peer, &format!("submit_transaction?data={encoded}"));
            set.spawn(async move { (peer, this.fetch_bytes(&url).await) });
        }

        let mut accepted = 0;
        let mut failed = Vec::new();
        while let Some(joined) = set.join_next().await {
            let Ok((peer, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(_) => accepted += 1,
                Err(_) => {
                    if !failed.contains(&peer) {
                        failed.push(peer);
                    }
                }
            }
        }
        FanOut {
            fetched: accepted,
            failed,
        }
    }

    /// Fetches a keyed value from a single peer (pool replacement).
    pub async fn get_from_single_target<T: DeserializeOwned>(
        &self,
        key: &str,
        peer: &str,
    ) -> Result<T> {
        let bytes = self.fetch_bytes(&self.url(peer, key)).await?;
        let mut envelope: serde_json::Value = serde_json::from_slice(&bytes)?;
        let value = envelope
            .get_mut(key)
            .map(serde_json::Value::take)
            .ok_or_else(|| NodeError::validation(format!("{peer} answer missing {key}")))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Asks a peer whether it stores a block hash.
    pub async fn knows_block(&self, peer: &str, block_hash: &str) -> bool {
        self.fetch_bytes(&self.url(peer, &format!("get_block?hash={block_hash}")))
            .await
            .is_ok()
    }

    /// Streams up to `count` successor blocks from a sync source.
    pub async fn get_blocks_after(
        &self,
        peer: &str,
        from_hash: &str,
        count: usize,
    ) -> Result<Vec<Block>> {
        let path = format!("get_blocks_after?hash={from_hash}&count={count}&compress=msgpack");
        let bytes = self.fetch_bytes(&self.url(peer, &path)).await?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    /// Discovers our public IP over well-known reflectors.
    pub async fn get_public_ip(&self) -> Result<String> {
        for reflector in ["https://api.ipify.org", "https://ipinfo.io/ip"] {
            match self.client.get(reflector).send().await {
                Ok(response) => {
                    if let Ok(text) = response.text().await {
                        let ip = text.trim().to_string();
                        if !ip.is_empty() {
                            return Ok(ip);
                        }
                    }
                }
                Err(e) => tracing::warn!("unable to fetch IP from {reflector}: {e}"),
            }
        }
        Err(NodeError::NetworkTimeout(
            "no public IP reflector answered".into(),
        ))
    }
}

/// Minimal percent-encoding for a JSON payload inside a query string.
pub fn url_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 3);
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
