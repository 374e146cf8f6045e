//! Shared handle the workers and the HTTP surface operate on.
//!
//! Lock discipline: the MemServer mutex is the buffer lock; when a task
//! needs both it acquires the MemServer mutex before the consensus mutex,
//! never the other way around. Long fan-outs snapshot state, release the
//! locks, and re-acquire to apply results.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::consensus::Consensus;
use crate::gossip::GossipClient;
use crate::memserver::MemServer;
use crate::metrics::NodeMetrics;
use crate::storage::Stores;

/// Everything a worker needs; cheap to clone.
#[derive(Clone)]
pub struct NodeContext {
    pub memserver: Arc<Mutex<MemServer>>,
    pub consensus: Arc<Mutex<Consensus>>,
    pub stores: Arc<Stores>,
    pub gossip: GossipClient,
    pub metrics: Arc<NodeMetrics>,
    terminate: Arc<AtomicBool>,
    pub home: PathBuf,
}

impl NodeContext {
    pub fn new(
        memserver: MemServer,
        stores: Stores,
        gossip: GossipClient,
        metrics: NodeMetrics,
        home: PathBuf,
    ) -> Self {
        NodeContext {
            memserver: Arc::new(Mutex::new(memserver)),
            consensus: Arc::new(Mutex::new(Consensus::new())),
            stores: Arc::new(stores),
            gossip,
            metrics: Arc::new(metrics),
            terminate: Arc::new(AtomicBool::new(false)),
            home,
        }
    }

    /// Signals every worker to finish its cycle and exit.
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Checked by each worker before sleeping.
    pub fn terminating(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }
}
