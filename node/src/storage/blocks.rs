//! Block store: content-addressed files plus the number index.
//!
//! Blocks live as MessagePack files under `blocks/<block_hash>.block`.
//! Saving verifies by reading the file back and comparing to the input;
//! the latest pointer is written the same way. The only mutation of a
//! stored block is closing the parent -> child link.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::types::Block;

use super::db::{CF_BLOCK_INDEX, Db, block_number_key, retry_forever};

/// Hashes of the two chain endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEnds {
    pub earliest_block: String,
    pub latest_block: String,
}

/// File- and index-backed block storage.
pub struct BlockStore {
    home: PathBuf,
    db: Arc<Db>,
}

impl BlockStore {
    pub fn new(home: &Path, db: Arc<Db>) -> Self {
        BlockStore {
            home: home.to_path_buf(),
            db,
        }
    }

    fn block_path(&self, block_hash: &str) -> PathBuf {
        self.home.join("blocks").join(format!("{block_hash}.block"))
    }

    fn latest_pointer_path(&self) -> PathBuf {
        self.home.join("index").join("latest_block.dat")
    }

    fn block_ends_path(&self) -> PathBuf {
        self.home.join("index").join("block_ends.dat")
    }

    fn producers_path(&self) -> PathBuf {
        self.home.join("index").join("block_producers.dat")
    }

    fn try_save_block(&self, block: &Block) -> Result<()> {
        let path = self.block_path(&block.block_hash);
        std::fs::write(&path, block.canonical_bytes()?)?;

        let read_back: Block = rmp_serde::from_slice(&std::fs::read(&path)?)?;
        if &read_back != block {
            return Err(NodeError::TransientStorage(format!(
                "block incoherence encountered for {}",
                block.block_hash
            )));
        }
        Ok(())
    }

    /// Persists a block, retrying until the durable copy equals the input.
    pub fn save_block(&self, block: &Block) {
        retry_forever("save_block", || self.try_save_block(block));
    }

    /// Loads a block by hash, `None` when unknown.
    pub fn get_block(&self, block_hash: &str) -> Option<Block> {
        let bytes = std::fs::read(self.block_path(block_hash)).ok()?;
        rmp_serde::from_slice(&bytes).ok()
    }

    /// Loads a block by hash or fails.
    pub fn load_block(&self, block_hash: &str) -> Result<Block> {
        self.get_block(block_hash)
            .ok_or_else(|| NodeError::TransientStorage(format!("block {block_hash} not on disk")))
    }

    /// Resolves a block number through the index.
    pub fn get_block_by_number(&self, number: u64) -> Option<Block> {
        let hash: Option<String> = self
            .db
            .get(CF_BLOCK_INDEX, &block_number_key(number))
            .ok()
            .flatten();
        self.get_block(&hash?)
    }

    fn write_verified(&self, path: &Path, contents: &str) -> Result<()> {
        std::fs::write(path, contents)?;
        let read_back = std::fs::read_to_string(path)?;
        if read_back != contents {
            return Err(NodeError::TransientStorage(format!(
                "verified write mismatch at {}",
                path.display()
            )));
        }
        Ok(())
    }

    fn try_set_latest(&self, block: &Block) -> Result<()> {
        self.write_verified(
            &self.latest_pointer_path(),
            &serde_json::to_string(&block.block_hash)?,
        )?;

        self.db.put(
            CF_BLOCK_INDEX,
            &block_number_key(block.block_number),
            &block.block_hash,
        )?;

        let mut ends = self.get_block_ends().unwrap_or(BlockEnds {
            earliest_block: block.block_hash.clone(),
            latest_block: block.block_hash.clone(),
        });
        ends.latest_block = block.block_hash.clone();
        std::fs::write(self.block_ends_path(), serde_json::to_vec(&ends)?)?;
        Ok(())
    }

    /// Atomically advances the latest pointer and the number index.
    pub fn set_latest_block_info(&self, block: &Block) {
        retry_forever("set_latest_block_info", || self.try_set_latest(block));
    }

    /// Records the earliest end of the chain (genesis, or the prune edge).
    pub fn set_earliest_block_info(&self, block: &Block) -> Result<()> {
        let latest = self
            .get_block_ends()
            .map(|ends| ends.latest_block)
            .unwrap_or_else(|| block.block_hash.clone());
        let ends = BlockEnds {
            earliest_block: block.block_hash.clone(),
            latest_block: latest,
        };
        std::fs::write(self.block_ends_path(), serde_json::to_vec(&ends)?)?;
        Ok(())
    }

    /// Both chain endpoints, when installed.
    pub fn get_block_ends(&self) -> Option<BlockEnds> {
        let raw = std::fs::read_to_string(self.block_ends_path()).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Loads the block behind the latest pointer.
    pub fn get_latest_block(&self) -> Result<Block> {
        let raw = std::fs::read_to_string(self.latest_pointer_path())?;
        let hash: String = serde_json::from_str(&raw)?;
        self.load_block(&hash)
    }

    /// Closes the parent -> child link.
    ///
    /// This is the single permitted mutation of an already-stored block.
    pub fn update_child_in_latest_block(&self, child_hash: &str, parent: &Block) -> Block {
        let mut updated = parent.clone();
        updated.child_hash = Some(child_hash.to_string());
        self.save_block(&updated);
        updated
    }

    /// Rollback path: drops the index row, then the file.
    pub fn unindex_block(&self, block: &Block) {
        retry_forever("unindex_block", || {
            self.db
                .delete(CF_BLOCK_INDEX, &block_number_key(block.block_number))
        });

        let path = self.block_path(&block.block_hash);
        retry_forever("remove_block_file", || {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            Ok(())
        });
    }

    /// Loads the persisted producer IP list.
    pub fn load_block_producers(&self) -> Vec<String> {
        std::fs::read_to_string(self.producers_path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    /// Persists the producer IP list, deduplicated and sorted.
    pub fn save_block_producers(&self, block_producers: &[String]) -> Result<()> {
        let mut sorted: Vec<String> = block_producers.to_vec();
        sorted.sort();
        sorted.dedup();
        std::fs::write(self.producers_path(), serde_json::to_vec(&sorted)?)?;
        Ok(())
    }
}
