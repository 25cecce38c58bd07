//! Integration tests for stake-weighted proposer selection.

use stakebft_consensus::{select_proposer, ProposerError};
use stakebft_types::{Address, ValidatorSet, H256};
use std::collections::HashMap;

fn make_validators(stakes: &[u64]) -> ValidatorSet {
    stakes
        .iter()
        .enumerate()
        .map(|(i, stake)| {
            let mut bytes = [0u8; 20];
            bytes[19] = i as u8 + 1;
            (Address::from(bytes), *stake)
        })
        .collect()
}

#[test]
fn test_empty_validator_set() {
    let result = select_proposer(&ValidatorSet::new(), &H256::NIL);
    assert!(matches!(result, Err(ProposerError::EmptyValidatorSet)));
}

#[test]
fn test_selection_is_deterministic() {
    let validators = make_validators(&[10, 20, 30, 40]);
    let seed = H256::keccak256(b"block 7");
    let first = select_proposer(&validators, &seed).unwrap();
    for _ in 0..10 {
        assert_eq!(select_proposer(&validators, &seed).unwrap(), first);
    }
}

#[test]
fn test_single_validator_always_selected() {
    let validators = make_validators(&[5]);
    let only = *validators.keys().next().unwrap();
    for i in 0..32u8 {
        assert_eq!(
            select_proposer(&validators, &H256::keccak256(&[i])).unwrap(),
            only
        );
    }
}

#[test]
fn test_selection_follows_stake() {
    // One validator holds 90% of the stake.
    let validators = make_validators(&[900, 50, 50]);
    let heavy = *validators.iter().max_by_key(|(_, s)| **s).unwrap().0;

    let mut counts: HashMap<Address, u32> = HashMap::new();
    for i in 0..2_000u32 {
        let seed = H256::keccak256(&i.to_be_bytes());
        *counts.entry(select_proposer(&validators, &seed).unwrap()).or_default() += 1;
    }
    let heavy_count = counts.get(&heavy).copied().unwrap_or(0);
    assert!(heavy_count > 1_600, "heavy validator picked {heavy_count} times");
    assert_eq!(counts.len(), 3, "every staked validator is picked eventually");
}

#[test]
fn test_different_seeds_spread_selection() {
    let validators = make_validators(&[1, 1, 1, 1]);
    let picked: std::collections::HashSet<Address> = (0..200u32)
        .map(|i| select_proposer(&validators, &H256::keccak256(&i.to_le_bytes())).unwrap())
        .collect();
    assert_eq!(picked.len(), 4);
}

#[test]
fn test_stake_overflow_is_reported() {
    let validators = make_validators(&[u64::MAX, 1]);
    assert!(matches!(
        select_proposer(&validators, &H256::NIL),
        Err(ProposerError::StakeOverflow)
    ));
}
