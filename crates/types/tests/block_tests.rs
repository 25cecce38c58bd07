//! Tests for blocks and genesis

use serde_json::json;
use stakebft_types::block::hash_transactions;
use stakebft_types::{
    Address, Block, ConsensusPath, GenesisSpec, Keypair, Operation, Transaction, ValidatorSet, H256,
};
use std::collections::BTreeMap;

fn key(byte: u8) -> Keypair {
    Keypair::from_bytes(&[byte; 32]).unwrap()
}

fn genesis_spec() -> GenesisSpec {
    let owner = key(1);
    let mut validators = ValidatorSet::new();
    validators.insert(owner.address(), 100);
    validators.insert(key(2).address(), 100);
    let mut values = BTreeMap::new();
    values.insert("/apps/hello".to_string(), json!("world"));
    GenesisSpec {
        owner,
        timestamp: 1_600_000_000_000,
        validators,
        proposer: None,
        values,
    }
}

fn tx(k: &Keypair, nonce: i64, ts: u64) -> Transaction {
    Transaction::sign(k, nonce, ts, Operation::set_value("/apps/n", json!(nonce))).unwrap()
}

#[test]
fn test_genesis_is_deterministic() {
    let a = Block::genesis(&genesis_spec()).unwrap();
    let b = Block::genesis(&genesis_spec()).unwrap();
    assert_eq!(a.hash, b.hash);
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    assert_eq!(a.number(), 0);
    assert!(a.last_hash().is_nil());
    assert!(a.validate_hashes());
}

#[test]
fn test_genesis_writes_round_one_bookkeeping() {
    let spec = genesis_spec();
    let genesis = Block::genesis(&spec).unwrap();
    let setup = &genesis.transactions[0];
    assert!(setup.verify().is_ok());
    let writes: BTreeMap<&str, &serde_json::Value> = setup.operation.writes().into_iter().collect();
    let total = ConsensusPath::TotalAtStake(1).to_string();
    let proposer = ConsensusPath::Proposer(1).to_string();
    assert_eq!(writes[total.as_str()], &json!(200));
    assert_eq!(writes[proposer.as_str()], &json!(spec.owner.address().to_hex()));
    assert_eq!(writes["/apps/hello"], &json!("world"));
}

#[test]
fn test_genesis_rejects_unknown_first_proposer() {
    let mut spec = genesis_spec();
    spec.proposer = Some(Address::new([9; 20]));
    assert!(Block::genesis(&spec).is_err());
    spec.proposer = None;
    spec.validators.clear();
    assert!(Block::genesis(&spec).is_err());
}

#[test]
fn test_genesis_rejects_stake_overflow() {
    let mut spec = genesis_spec();
    spec.validators.insert(key(3).address(), u64::MAX);
    assert!(matches!(
        Block::genesis(&spec),
        Err(stakebft_types::Error::InvalidGenesis(_))
    ));
}

#[test]
fn test_header_hash_changes_with_fields() {
    let block = Block::new(H256::NIL, vec![], vec![], 1, 10, Address::ZERO, ValidatorSet::new());
    let mut header = block.header.clone();
    header.number = 2;
    assert_ne!(Block::compute_hash(&header), block.hash);
    assert_eq!(block.header_hash(), block.hash);
}

#[test]
fn test_validate_hashes_detects_tampering() {
    let k = key(3);
    let mut block = Block::new(
        H256::NIL,
        vec![],
        vec![tx(&k, 0, 1)],
        1,
        10,
        k.address(),
        ValidatorSet::new(),
    );
    assert!(block.validate_hashes());
    block.transactions.push(tx(&k, 1, 2));
    assert!(!block.validate_hashes());
    block.transactions.pop();
    block.last_votes.push(tx(&k, -1, 3));
    assert!(!block.validate_hashes());
    block.last_votes.clear();
    block.hash = H256::keccak256(b"other");
    assert!(!block.validate_hashes());
}

#[test]
fn test_validate_proposed_block() {
    let a = key(4);
    let b = key(5);
    let txs = vec![tx(&a, 4, 1), tx(&b, 0, 2), tx(&a, 5, 3), tx(&a, -1, 4)];
    let block = Block::new(H256::NIL, vec![], txs, 8, 10, a.address(), ValidatorSet::new());
    assert!(block.validate_proposed_block(7));
    assert!(!block.validate_proposed_block(8));

    let gap = vec![tx(&a, 4, 1), tx(&a, 6, 2)];
    let block = Block::new(H256::NIL, vec![], gap, 8, 10, a.address(), ValidatorSet::new());
    assert!(!block.validate_proposed_block(7));
}

#[test]
fn test_from_json_yields_none_on_garbage() {
    assert!(Block::from_json(b"not json").is_none());
    assert!(Block::from_json(br#"{"header": {}}"#).is_none());
    let genesis = Block::genesis(&genesis_spec()).unwrap();
    let parsed = Block::from_json(&genesis.to_json().unwrap()).unwrap();
    assert_eq!(parsed, genesis);
}

#[test]
fn test_file_name_encodes_number_and_hashes() {
    let genesis = Block::genesis(&genesis_spec()).unwrap();
    let name = genesis.file_name();
    assert!(name.starts_with("0-00000000-"));
    assert!(name.ends_with(".json"));
    assert_eq!(hash_transactions(&[]), hash_transactions(&[]));
}
