//! Tests for the transaction orderer.

use serde_json::json;
use stakebft_mempool::{OrdererConfig, TransactionOrderer, TxStatus};
use stakebft_types::{Address, Block, Keypair, Operation, Transaction, ValidatorSet, H256};

fn key(byte: u8) -> Keypair {
    Keypair::from_bytes(&[byte; 32]).unwrap()
}

fn tx(k: &Keypair, nonce: i64, timestamp: u64) -> Transaction {
    Transaction::sign(k, nonce, timestamp, Operation::set_value("/apps/v", json!(timestamp))).unwrap()
}

fn block(number: u64, timestamp: u64, transactions: Vec<Transaction>) -> Block {
    Block::new(H256::NIL, vec![], transactions, number, timestamp, Address::ZERO, ValidatorSet::new())
}

fn nonces_of(batch: &[Transaction], address: Address) -> Vec<i64> {
    batch.iter().filter(|t| t.address == address).map(|t| t.nonce).collect()
}

#[test]
fn test_add_rejects_bad_signature_and_duplicates() {
    let a = key(1);
    let mut orderer = TransactionOrderer::new(OrdererConfig::default());
    let good = tx(&a, 0, 1);
    assert!(orderer.add(good.clone()));
    assert!(!orderer.add(good.clone()));
    assert!(!orderer.is_eligible(&good));

    let mut forged = tx(&a, 1, 2);
    forged.address = key(2).address();
    assert!(!orderer.add(forged));
    assert_eq!(orderer.len(), 1);
    assert_eq!(orderer.next_nonce(&a.address()), 1);
}

#[test]
fn test_stale_nonce_is_not_eligible() {
    let a = key(1);
    let mut orderer = TransactionOrderer::new(OrdererConfig::default());
    orderer.cleanup_for_block(&block(1, 10, vec![tx(&a, 0, 1), tx(&a, 1, 2)]));
    assert!(!orderer.is_eligible(&tx(&a, 1, 3)));
    assert!(orderer.is_eligible(&tx(&a, 2, 4)));
    assert!(orderer.is_eligible(&tx(&a, -1, 5)));
}

#[test]
fn test_batch_preserves_nonce_order() {
    let a = key(1);
    let b = key(2);
    let c = key(3);
    let mut orderer = TransactionOrderer::new(OrdererConfig::default());
    // Later nonces carry earlier timestamps to stress the merge.
    for t in [tx(&a, 2, 10), tx(&a, 0, 30), tx(&a, 1, 20)] {
        orderer.add(t);
    }
    for t in [tx(&b, 1, 5), tx(&b, 0, 15)] {
        orderer.add(t);
    }
    orderer.add(tx(&c, -1, 1));
    orderer.add(tx(&c, -1, 2));

    let batch = orderer.ordered_batch();
    assert_eq!(nonces_of(&batch, a.address()), vec![0, 1, 2]);
    assert_eq!(nonces_of(&batch, b.address()), vec![0, 1]);
    assert_eq!(nonces_of(&batch, c.address()).len(), 2);
    assert_eq!(batch.len(), 7);
}

#[test]
fn test_nonce_gap_is_excluded() {
    let a = key(1);
    let b = key(2);
    let mut orderer = TransactionOrderer::new(OrdererConfig::default());
    orderer.cleanup_for_block(&block(1, 10, vec![tx(&a, 0, 1)]));

    // committed = 0, nonce 2 arrives without nonce 1
    orderer.add(tx(&a, 2, 20));
    orderer.add(tx(&b, 0, 21));
    let batch = orderer.ordered_batch();
    assert!(nonces_of(&batch, a.address()).is_empty());
    assert_eq!(nonces_of(&batch, b.address()), vec![0]);

    // single address pools drop gaps too
    let mut solo = TransactionOrderer::new(OrdererConfig::default());
    solo.add(tx(&a, 0, 1));
    solo.add(tx(&a, 2, 2));
    assert_eq!(nonces_of(&solo.ordered_batch(), a.address()), vec![0]);

    // once the gap is filled both go through
    orderer.add(tx(&a, 1, 22));
    assert_eq!(nonces_of(&orderer.ordered_batch(), a.address()), vec![1, 2]);
}

#[test]
fn test_batch_is_deterministic_across_insertion_order() {
    let keys: Vec<Keypair> = (1..=4).map(key).collect();
    let txs: Vec<Transaction> = keys
        .iter()
        .enumerate()
        .flat_map(|(i, k)| (0..3).map(move |n| tx(k, n, 100 - (i as u64) * 7 + n as u64 * 3)))
        .collect();

    let mut forward = TransactionOrderer::new(OrdererConfig::default());
    txs.iter().cloned().for_each(|t| {
        forward.add(t);
    });
    let mut backward = TransactionOrderer::new(OrdererConfig::default());
    txs.iter().rev().cloned().for_each(|t| {
        backward.add(t);
    });

    let a: Vec<H256> = forward.ordered_batch().iter().map(|t| t.hash).collect();
    let b: Vec<H256> = backward.ordered_batch().iter().map(|t| t.hash).collect();
    assert_eq!(a, b);
    assert_eq!(a.len(), 12);
}

#[test]
fn test_cleanup_is_idempotent() {
    let a = key(1);
    let mut orderer = TransactionOrderer::new(OrdererConfig::default());
    let committed = vec![tx(&a, 0, 1), tx(&a, 1, 2)];
    for t in &committed {
        orderer.add(t.clone());
    }
    orderer.add(tx(&a, 2, 3));
    let b = block(4, 50, committed.clone());

    orderer.cleanup_for_block(&b);
    let first = orderer.nonces().committed(&a.address());
    orderer.cleanup_for_block(&b);
    assert_eq!(orderer.nonces().committed(&a.address()), first);
    assert_eq!(first, Some(1));
    assert_eq!(orderer.len(), 1);
    assert_eq!(orderer.nonces().pending(&a.address()), Some(2));
    assert_eq!(
        orderer.status(&committed[1].hash),
        Some(TxStatus::Block { number: 4, index: 1, timestamp: 2 })
    );
    assert!(orderer.is_finalized(&committed[0].hash));
}

#[test]
fn test_timeout_eviction_and_pending_rebuild() {
    let a = key(1);
    let b = key(2);
    let config = OrdererConfig {
        pool_timeout_ms: 100,
        tracker_timeout_ms: 1_000,
    };
    let mut orderer = TransactionOrderer::new(config);
    let old = tx(&a, 0, 10);
    let young = tx(&b, 0, 150);
    orderer.add(old.clone());
    orderer.add(young.clone());
    assert_eq!(orderer.next_nonce(&a.address()), 1);

    // block at 110: old is exactly at its deadline
    orderer.cleanup_for_block(&block(1, 110, vec![]));
    assert_eq!(orderer.len(), 1);
    assert_eq!(orderer.next_nonce(&a.address()), 0, "pending rebuilt without evicted tx");
    assert!(orderer.status(&old.hash).is_some(), "tracker still remembers it");
    assert!(!orderer.add(old.clone()), "cannot be replayed while tracked");

    orderer.cleanup_for_block(&block(2, 1_010, vec![]));
    assert!(orderer.status(&old.hash).is_none());
    assert!(orderer.is_empty());
}

#[test]
fn test_committed_entries_time_out_without_replay() {
    let a = key(1);
    let config = OrdererConfig {
        pool_timeout_ms: 100,
        tracker_timeout_ms: 1_000,
    };
    let mut orderer = TransactionOrderer::new(config);
    let unordered = tx(&a, -1, 10);
    orderer.add(unordered.clone());
    orderer.cleanup_for_block(&block(1, 20, vec![unordered.clone()]));
    assert!(orderer.is_finalized(&unordered.hash));

    orderer.cleanup_for_block(&block(2, 1_010, vec![]));
    assert_eq!(orderer.status(&unordered.hash), None);

    // Forgotten by the tracker, but past the pool timeout as well.
    assert!(!orderer.is_eligible(&unordered));
    assert!(!orderer.add(unordered));
    assert!(orderer.is_empty());

    assert!(orderer.is_eligible(&tx(&a, -1, 1_000)));
}
