//! First-start bootstrap: folders, genesis block, keys, self-peer.
//!
//! Everything here is idempotent; a node that already has a chain on disk
//! passes through untouched.

use std::path::Path;

use crate::config::get_timestamp_seconds;
use crate::error::Result;
use crate::keys::{KeyDict, generate_keys, keyfile_found, load_keys, save_keys};
use crate::storage::Stores;
use crate::types::{Block, PeerRecord};

/// Address holding the initial reserve.
pub const GENESIS_ADDRESS: &str = "ndo18c3afa286439e7ebcb284710dbd4ae42bdaf21b80137b";

/// Initial reserve balance, in base units.
pub const GENESIS_BALANCE: u64 = 1_000_000_000_000_000_000;

/// Timestamp of block zero.
pub const GENESIS_TIMESTAMP: u64 = 1_669_852_800;

/// IP recorded in block zero.
pub const GENESIS_IP: &str = "78.102.98.72";

/// Creates the on-disk layout under `home`.
pub fn make_folders(home: &Path) -> Result<()> {
    for dir in [
        "blocks",
        "peers",
        "private",
        "index",
        "index/producer_sets",
        "logs",
    ] {
        std::fs::create_dir_all(home.join(dir))?;
    }
    Ok(())
}

/// True once a chain exists under `home`.
pub fn genesis_found(home: &Path) -> bool {
    home.join("index").join("block_ends.dat").exists()
}

/// Installs the genesis block, account and peer record.
pub fn make_genesis(
    stores: &Stores,
    address: &str,
    balance: u64,
    ip: &str,
    port: u16,
    timestamp: u64,
) -> Result<Block> {
    let genesis_block = Block::genesis(address, ip, timestamp);

    stores.accounts.create_account(address, balance)?;

    let mut record = PeerRecord::new(ip, port, address);
    record.last_seen = Some(get_timestamp_seconds());
    stores.peers.save_peer(&record, false)?;

    stores.blocks.save_block(&genesis_block);
    stores.blocks.set_latest_block_info(&genesis_block);
    stores.blocks.set_earliest_block_info(&genesis_block)?;

    Ok(genesis_block)
}

/// Loads the node keydict, generating and self-registering on first start.
pub fn ensure_keys(home: &Path, stores: &Stores, own_ip: &str, port: u16) -> Result<KeyDict> {
    if keyfile_found(home) {
        return load_keys(home);
    }

    let keydict = generate_keys();
    save_keys(home, &keydict)?;

    let mut own_record = PeerRecord::new(own_ip, port, keydict.address.clone());
    own_record.peer_trust = 10_000;
    own_record.last_seen = Some(get_timestamp_seconds());
    stores.peers.save_peer(&own_record, false)?;

    Ok(keydict)
}
