//! End-to-end chain flow against a real on-disk node home.
//!
//! Each test boots a fresh data directory, installs genesis, and drives
//! the production pipeline directly: candidate -> verify -> incorporate,
//! then checks balances, totals, indexes and rollback symmetry.

use serde_json::json;
use tempfile::TempDir;

use node::config::NodeConfig;
use node::genesis::{GENESIS_ADDRESS, GENESIS_BALANCE, GENESIS_TIMESTAMP, make_folders, make_genesis};
use node::keys::{KeyDict, generate_keys};
use node::loops::core::produce_block;
use node::memserver::MemServer;
use node::production::get_block_candidate;
use node::rollback::rollback_one_block;
use node::types::transaction::{create_transaction, draft_transaction};
use node::types::{Block, PeerRecord, Totals, Transaction};
use node::{GossipClient, NodeContext, NodeMetrics, Stores};

const OWN_IP: &str = "203.0.113.7";

struct TestNode {
    _tmp: TempDir,
    ctx: NodeContext,
    keydict: KeyDict,
}

async fn boot_node() -> TestNode {
    let tmp = TempDir::new().expect("create temp dir");
    make_folders(tmp.path()).expect("folders");

    let mut config = NodeConfig::template(OWN_IP);
    // A fresh test chain runs the modern rules from block one.
    config.legacy_signature_height = 0;
    config.legacy_fee_height = 0;
    config.min_peers = 1;

    let stores = Stores::open(tmp.path(), config.legacy_fee_height).expect("open stores");
    let genesis = make_genesis(
        &stores,
        GENESIS_ADDRESS,
        GENESIS_BALANCE,
        OWN_IP,
        config.port,
        GENESIS_TIMESTAMP,
    )
    .expect("install genesis");

    let keydict = generate_keys();
    stores
        .peers
        .save_peer(
            &PeerRecord::new(OWN_IP, config.port, keydict.address.clone()),
            true,
        )
        .expect("register self as producer");

    let earliest = genesis.block_hash.clone();
    let mut memserver = MemServer::new(
        config,
        keydict.clone(),
        genesis,
        earliest,
        vec![OWN_IP.to_string()],
    );
    memserver.peers = vec![OWN_IP.to_string()];

    let ctx = NodeContext::new(
        memserver,
        stores,
        GossipClient::new(9173).expect("gossip client"),
        NodeMetrics::new().expect("metrics"),
        tmp.path().to_path_buf(),
    );

    TestNode {
        _tmp: tmp,
        ctx,
        keydict,
    }
}

/// Builds and accepts the next block carrying `transactions`.
async fn produce_next(node: &TestNode, transactions: Vec<Transaction>) -> Block {
    let mut memserver = node.ctx.memserver.lock().await;
    let mut consensus = node.ctx.consensus.lock().await;

    memserver.transaction_pool = transactions;

    let (candidate, penalties) = get_block_candidate(
        &node.ctx.stores.blocks,
        &node.ctx.stores.accounts,
        &node.ctx.stores.peers,
        &memserver.block_producers.clone(),
        memserver.block_producers_hash.clone(),
        &memserver.transaction_pool.clone(),
        &memserver.latest_block.clone(),
        memserver.block_time,
    )
    .expect("candidate");
    memserver.penalties = penalties;

    let accepted = produce_block(
        &node.ctx,
        &mut memserver,
        &mut consensus,
        candidate,
        false,
        None,
    );
    assert!(accepted, "block should be accepted");
    memserver.latest_block.clone()
}

fn make_transaction(
    keydict: &KeyDict,
    recipient: &str,
    amount: u64,
    fee: u64,
    target_block: u64,
) -> Transaction {
    let draft = draft_transaction(
        keydict.address.clone(),
        recipient,
        amount,
        keydict.public_key.clone(),
        GENESIS_TIMESTAMP + 60,
        json!({"data_id": "test"}),
        target_block,
    );
    create_transaction(draft, &keydict.private_key, fee).expect("create transaction")
}

#[tokio::test]
async fn genesis_plus_one_links_the_chain() {
    let node = boot_node().await;

    let genesis_hash = node.ctx.memserver.lock().await.latest_block.block_hash.clone();
    let block_one = produce_next(&node, Vec::new()).await;

    assert_eq!(block_one.block_number, 1);
    // Empty mempool history earns nothing.
    assert_eq!(block_one.block_reward, 0);

    let creator = node
        .ctx
        .stores
        .accounts
        .get_account(&block_one.block_creator, false)
        .unwrap()
        .expect("creator account");
    assert_eq!(creator.produced, 0);

    let parent = node
        .ctx
        .stores
        .blocks
        .load_block(&genesis_hash)
        .expect("genesis on disk");
    assert_eq!(parent.child_hash.as_deref(), Some(block_one.block_hash.as_str()));

    let latest = node.ctx.stores.blocks.get_latest_block().expect("latest");
    assert_eq!(latest.block_hash, block_one.block_hash);
}

#[tokio::test]
async fn transaction_life_moves_amount_fee_and_indexes() {
    let node = boot_node().await;
    produce_next(&node, Vec::new()).await;

    let sender = generate_keys();
    let recipient = generate_keys();
    node.ctx
        .stores
        .accounts
        .create_account(&sender.address, 1_000_000_000_000)
        .expect("fund sender");

    let amount = 1_000_000_000;
    let fee = 256;
    let tx = make_transaction(&sender, &recipient.address, amount, fee, 2);

    let block_two = produce_next(&node, vec![tx.clone()]).await;
    assert_eq!(block_two.block_number, 2);
    assert_eq!(block_two.block_transactions.len(), 1);

    let sender_account = node
        .ctx
        .stores
        .accounts
        .get_account(&sender.address, false)
        .unwrap()
        .expect("sender account");
    assert_eq!(sender_account.balance, 1_000_000_000_000 - amount - fee);

    let recipient_account = node
        .ctx
        .stores
        .accounts
        .get_account(&recipient.address, false)
        .unwrap()
        .expect("recipient account");
    assert_eq!(recipient_account.balance, amount);

    let totals = node.ctx.stores.accounts.fetch_totals().unwrap();
    assert_eq!(totals.fees, fee);

    // Queryable by txid.
    let fetched = node
        .ctx
        .stores
        .transactions
        .get_transaction(&tx.txid, &node.ctx.stores.blocks)
        .expect("transaction indexed");
    assert_eq!(fetched, tx);

    // And through the account range scan.
    let page = node
        .ctx
        .stores
        .transactions
        .get_transactions_of_account(&sender.address, 0, &node.ctx.stores.blocks)
        .expect("scan");
    assert_eq!(page["0-100"].len(), 1);
    assert_eq!(page["0-100"][0].txid, tx.txid);
}

#[tokio::test]
async fn burning_credits_the_sender_and_shrinks_supply() {
    let node = boot_node().await;
    produce_next(&node, Vec::new()).await;

    let sender = generate_keys();
    node.ctx
        .stores
        .accounts
        .create_account(&sender.address, 100_000_000_000)
        .expect("fund sender");

    let amount = 5_000_000_000;
    let fee = 300;
    let tx = make_transaction(&sender, "burn", amount, fee, 2);
    produce_next(&node, vec![tx]).await;

    let sender_account = node
        .ctx
        .stores
        .accounts
        .get_account(&sender.address, false)
        .unwrap()
        .expect("sender account");
    assert_eq!(sender_account.balance, 100_000_000_000 - amount - fee);
    assert_eq!(sender_account.burned, amount);

    let totals = node.ctx.stores.accounts.fetch_totals().unwrap();
    assert_eq!(totals.burned, amount);

    // The sentinel never holds funds.
    let burn_account = node.ctx.stores.accounts.get_account("burn", false).unwrap();
    assert!(burn_account.is_none() || burn_account.unwrap().balance == 0);
}

#[tokio::test]
async fn three_rollbacks_restore_the_post_genesis_state() {
    let node = boot_node().await;

    let sender = generate_keys();
    node.ctx
        .stores
        .accounts
        .create_account(&sender.address, 500_000_000_000)
        .expect("fund sender");

    let post_genesis_latest = node.ctx.stores.blocks.get_latest_block().unwrap();
    let post_genesis_totals = node.ctx.stores.accounts.fetch_totals().unwrap();
    let post_genesis_sender = node
        .ctx
        .stores
        .accounts
        .get_account(&sender.address, false)
        .unwrap()
        .unwrap();

    // Three blocks, one transaction each.
    let recipients: Vec<KeyDict> = (0..3).map(|_| generate_keys()).collect();
    let mut produced_blocks = Vec::new();
    let mut txids = Vec::new();
    for (i, recipient) in recipients.iter().enumerate() {
        let target = i as u64 + 1;
        let tx = make_transaction(&sender, &recipient.address, 1_000_000, 50, target);
        txids.push(tx.txid.clone());
        produced_blocks.push(produce_next(&node, vec![tx]).await);
    }
    assert_eq!(
        node.ctx.stores.blocks.get_latest_block().unwrap().block_number,
        3
    );

    // Roll all three back, newest first.
    for block in produced_blocks.iter().rev() {
        let previous = rollback_one_block(&node.ctx.stores, block).expect("rollback");
        let mut memserver = node.ctx.memserver.lock().await;
        memserver.latest_block = previous;
    }

    // Latest pointer, accounts, totals and indexes equal the post-genesis
    // state again.
    let latest = node.ctx.stores.blocks.get_latest_block().unwrap();
    assert_eq!(latest.block_hash, post_genesis_latest.block_hash);
    assert_eq!(latest.block_number, 0);

    let sender_account = node
        .ctx
        .stores
        .accounts
        .get_account(&sender.address, false)
        .unwrap()
        .unwrap();
    assert_eq!(sender_account, post_genesis_sender);

    for recipient in &recipients {
        let account = node
            .ctx
            .stores
            .accounts
            .get_account(&recipient.address, false)
            .unwrap()
            .expect("recipient account row survives");
        assert_eq!(account.balance, 0);
    }

    let totals = node.ctx.stores.accounts.fetch_totals().unwrap();
    assert_eq!(totals, post_genesis_totals);
    assert_eq!(totals, Totals::default());

    for (txid, block) in txids.iter().zip(&produced_blocks) {
        assert!(node.ctx.stores.transactions.validate_uniqueness(txid).unwrap());
        assert!(node.ctx.stores.blocks.get_block(&block.block_hash).is_none());
        assert!(
            node.ctx
                .stores
                .blocks
                .get_block_by_number(block.block_number)
                .is_none()
        );
    }
}

#[tokio::test]
async fn rollback_inverts_a_single_produce_exactly() {
    let node = boot_node().await;

    let sender = generate_keys();
    node.ctx
        .stores
        .accounts
        .create_account(&sender.address, 10_000_000)
        .expect("fund sender");

    let before_creator = node
        .ctx
        .stores
        .accounts
        .get_account(GENESIS_ADDRESS, false)
        .unwrap()
        .unwrap();

    let tx = make_transaction(&sender, &generate_keys().address, 1_000, 10, 1);
    let block = produce_next(&node, vec![tx]).await;

    let previous = rollback_one_block(&node.ctx.stores, &block).expect("rollback");
    assert_eq!(previous.block_number, 0);

    // Creator reward and produced counter are restored.
    let creator = node
        .ctx
        .stores
        .accounts
        .get_account(&block.block_creator, false)
        .unwrap()
        .unwrap();
    assert_eq!(creator.produced, 0);

    let genesis_account = node
        .ctx
        .stores
        .accounts
        .get_account(GENESIS_ADDRESS, false)
        .unwrap()
        .unwrap();
    assert_eq!(genesis_account, before_creator);

    assert_eq!(
        node.ctx.stores.accounts.fetch_totals().unwrap(),
        Totals::default()
    );
}
