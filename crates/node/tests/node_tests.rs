//! Integration tests for node wiring and message dispatch.

use serde_json::json;
use stakebft::{Node, NodeEvent, NodeStatus};
use stakebft_config::Config;
use stakebft_consensus::{MessageBody, NetworkMessage, PROTOCOL_VERSION};
use stakebft_storage::StateStore;
use stakebft_types::{now_millis, Keypair, Operation, Transaction};
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn validator_key() -> Keypair {
    Keypair::from_bytes(&[11u8; 32]).unwrap()
}

/// Single-validator network kept in memory.
fn dev_config() -> Config {
    let mut config = Config::development(&validator_key());
    config.storage.data_dir = None;
    config.consensus.stall_ticks = 0;
    config
}

/// Same network, run by a key without stake.
fn follower_config() -> Config {
    let mut config = dev_config();
    config.node.private_key = Some(Keypair::from_bytes(&[12u8; 32]).unwrap().secret_hex());
    config
}

fn persistent_config(dir: &Path) -> Config {
    let mut config = dev_config();
    config.storage.data_dir = Some(dir.to_path_buf());
    config
}

fn tick_until(node: &Node, height: u64) {
    for _ in 0..100 {
        if node.last_number() >= height {
            return;
        }
        node.tick();
    }
    panic!("node stuck at {}", node.last_number());
}

fn user_tx(key: &Keypair, nonce: i64, path: &str) -> Transaction {
    Transaction::sign(key, nonce, now_millis(), Operation::set_value(path, json!("v"))).unwrap()
}

#[test]
fn test_new_node_starts_after_genesis() {
    let node = Node::new(dev_config()).unwrap();
    assert_eq!(node.status(), NodeStatus::Starting);
    assert_eq!(node.last_number(), 0);
    assert_eq!(node.consensus_number(), 1);
}

#[test]
fn test_new_node_requires_key() {
    let mut config = dev_config();
    config.node.private_key = None;
    assert!(Node::new(config).is_err());
}

#[test]
fn test_single_validator_commits_blocks() {
    let node = Node::new(dev_config()).unwrap();
    let mut events = node.subscribe();

    tick_until(&node, 2);

    assert_eq!(node.consensus_number(), node.last_number() + 1);
    let first = events.try_recv().unwrap();
    assert!(matches!(first, NodeEvent::BlockCommitted { number: 1, .. }));

    // The votes that finalized block 1 travel in block 2.
    let block = node.chain().read().block_at(2).unwrap();
    assert!(!block.last_votes.is_empty());
}

#[test]
fn test_transaction_is_pooled_and_committed() {
    let node = Node::new(dev_config()).unwrap();
    let user = Keypair::from_bytes(&[40u8; 32]).unwrap();
    let tx = user_tx(&user, 0, "/apps/greeting");

    assert!(node
        .handle_message(NetworkMessage::new(MessageBody::Transaction { tx: tx.clone() }))
        .is_none());
    assert_eq!(node.orderer().lock().len(), 1);
    assert_eq!(node.db().read().get_value("/apps/greeting"), Some(json!("v")));

    tick_until(&node, 1);

    let block = node.chain().read().block_at(1).unwrap();
    assert!(block.transactions.iter().any(|t| t.hash == tx.hash));
    assert!(node.orderer().lock().is_empty());
    assert!(node.orderer().lock().is_finalized(&tx.hash));
}

#[test]
fn test_transaction_is_gossiped() {
    let node = Node::new(dev_config()).unwrap();
    let mut outbound = node.take_outbound().unwrap();
    assert!(node.take_outbound().is_none());

    let user = Keypair::from_bytes(&[41u8; 32]).unwrap();
    node.handle_message(NetworkMessage::new(MessageBody::Transaction {
        tx: user_tx(&user, 0, "/apps/a"),
    }));

    let message = outbound.try_recv().unwrap();
    assert!(matches!(message.body, MessageBody::Transaction { .. }));
}

#[test]
fn test_consensus_write_as_transaction_is_dropped() {
    let node = Node::new(dev_config()).unwrap();
    let user = Keypair::from_bytes(&[42u8; 32]).unwrap();
    let tx = user_tx(&user, 0, "/consensus/number/1/propose");

    node.handle_message(NetworkMessage::new(MessageBody::Transaction { tx }));
    assert!(node.orderer().lock().is_empty());
}

#[test]
fn test_duplicate_transaction_is_ignored() {
    let node = Node::new(dev_config()).unwrap();
    let user = Keypair::from_bytes(&[43u8; 32]).unwrap();
    let tx = user_tx(&user, 0, "/apps/b");

    for _ in 0..3 {
        node.handle_message(NetworkMessage::new(MessageBody::Transaction { tx: tx.clone() }));
    }
    assert_eq!(node.orderer().lock().len(), 1);
}

#[test]
fn test_incompatible_version_is_dropped() {
    let node = Node::new(dev_config()).unwrap();
    let user = Keypair::from_bytes(&[44u8; 32]).unwrap();
    let message = NetworkMessage::with_version(
        "0.0.1",
        MessageBody::Transaction {
            tx: user_tx(&user, 0, "/apps/c"),
        },
    );

    assert!(node.handle_message(message).is_none());
    assert!(node.orderer().lock().is_empty());
}

#[test]
fn test_up_to_date_request_gets_consensus_state() {
    let node = Node::new(dev_config()).unwrap();
    let genesis = node.chain().read().genesis().clone();

    let reply = node
        .handle_message(NetworkMessage::new(MessageBody::ChainSubsectionRequest {
            last_block: genesis,
        }))
        .unwrap();

    assert_eq!(reply.protocol_version, PROTOCOL_VERSION);
    match reply.body {
        MessageBody::ChainSubsection {
            chain_subsection,
            number,
            consensus_state,
        } => {
            assert!(chain_subsection.is_empty());
            assert_eq!(number, 0);
            assert_eq!(consensus_state.unwrap().number, 1);
        }
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn test_follower_syncs_from_validator() {
    let validator = Node::new(dev_config()).unwrap();
    tick_until(&validator, 3);

    let follower = Node::new(follower_config()).unwrap();
    let genesis = follower.chain().read().genesis().clone();

    let request = NetworkMessage::new(MessageBody::ChainSubsectionRequest { last_block: genesis });
    let reply = validator.handle_message(request).unwrap();
    let next = follower.handle_message(reply);

    assert!(next.is_none());
    assert_eq!(follower.last_number(), validator.last_number());
    assert_eq!(follower.consensus_number(), validator.last_number() + 1);
    assert_eq!(
        follower.chain().read().last_hash(),
        validator.chain().read().last_hash()
    );
}

#[test]
fn test_long_chain_syncs_in_sections() {
    let mut config = dev_config();
    config.storage.subsection_length = 2;
    let validator = Node::new(config).unwrap();
    tick_until(&validator, 5);

    let follower = Node::new(follower_config()).unwrap();
    let genesis = follower.chain().read().genesis().clone();
    let mut request = Some(NetworkMessage::new(MessageBody::ChainSubsectionRequest {
        last_block: genesis,
    }));

    let mut rounds = 0;
    while let Some(message) = request {
        let reply = validator.handle_message(message).unwrap();
        request = follower.handle_message(reply);
        rounds += 1;
        assert!(rounds < 20, "sync did not converge");
    }

    assert!(rounds > 1);
    assert_eq!(follower.last_number(), validator.last_number());
}

#[test]
fn test_unknown_block_request_is_ignored() {
    let validator = Node::new(dev_config()).unwrap();
    tick_until(&validator, 1);

    // A chain with a different genesis.
    let mut other = dev_config();
    other.genesis.timestamp += 1;
    let stranger = Node::new(other).unwrap();
    tick_until(&stranger, 1);
    let foreign = stranger.chain().read().last_block().clone();

    assert!(validator
        .handle_message(NetworkMessage::new(MessageBody::ChainSubsectionRequest {
            last_block: foreign,
        }))
        .is_none());
}

#[test]
fn test_restart_replays_stored_chain() {
    let dir = tempdir().unwrap();
    let (height, hash) = {
        let node = Node::new(persistent_config(dir.path())).unwrap();
        tick_until(&node, 3);
        let x = (node.last_number(), node.chain().read().last_hash());
        x
    };

    let node = Node::new(persistent_config(dir.path())).unwrap();
    assert_eq!(node.last_number(), height);
    assert_eq!(node.chain().read().last_hash(), hash);
    assert_eq!(node.consensus_number(), height + 1);
}

#[tokio::test]
async fn test_run_ticks_until_stopped() {
    let mut config = dev_config();
    config.consensus.tick_interval_ms = 5;
    let node = Node::new(config).unwrap();

    let _ = tokio::time::timeout(Duration::from_millis(500), node.run()).await;

    assert_eq!(node.status(), NodeStatus::Running);
    assert!(node.last_number() >= 1);
}
