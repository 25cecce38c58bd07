//! Tests for transaction signing and verification

use serde_json::json;
use stakebft_types::{Keypair, Operation, Transaction, UNORDERED_NONCE};

fn test_keypair() -> Keypair {
    // Fixed test key, never use outside tests.
    Keypair::from_hex("0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20").unwrap()
}

#[test]
fn test_sign_and_verify() {
    let key = test_keypair();
    let tx = Transaction::sign(&key, 0, 1_000, Operation::set_value("/apps/x", json!("y"))).unwrap();
    assert_eq!(tx.address, key.address());
    assert!(tx.verify().is_ok());
    assert!(tx.is_ordered());
}

#[test]
fn test_signing_is_deterministic() {
    let key = test_keypair();
    let op = Operation::set_value("/apps/x", json!({"b": 1, "a": 2}));
    let a = Transaction::sign(&key, 3, 42, op.clone()).unwrap();
    let b = Transaction::sign(&key, 3, 42, op).unwrap();
    assert_eq!(a.hash, b.hash);
    assert_eq!(a.signature, b.signature);
}

#[test]
fn test_tampered_body_fails_verification() {
    let key = test_keypair();
    let mut tx = Transaction::sign(&key, 1, 10, Operation::set_value("/a", json!(1))).unwrap();
    tx.nonce = 2;
    assert!(tx.verify().is_err());
}

#[test]
fn test_forged_address_fails_verification() {
    let key = test_keypair();
    let other = Keypair::random();
    let mut tx = Transaction::sign(&key, 1, 10, Operation::set_value("/a", json!(1))).unwrap();
    tx.address = other.address();
    assert!(tx.verify().is_err());
}

#[test]
fn test_json_round_trip_preserves_validity() {
    let key = test_keypair();
    let tx = Transaction::sign(
        &key,
        UNORDERED_NONCE,
        7,
        Operation::Set {
            op_list: vec![
                Operation::set_value("/a", json!(1)),
                Operation::set_value("/b", json!([1, 2, 3])),
            ],
        },
    )
    .unwrap();
    let encoded = serde_json::to_string(&tx).unwrap();
    let decoded: Transaction = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, tx);
    assert!(decoded.verify().is_ok());
    assert!(!decoded.is_ordered());
}

#[test]
fn test_keypair_hex_round_trip() {
    let key = Keypair::random();
    let again = Keypair::from_hex(&key.secret_hex()).unwrap();
    assert_eq!(key.address(), again.address());
    assert!(Keypair::from_hex("abcd").is_err());
}
