//! # Stake-Weighted Proposer Selection
//!
//! The proposer of a round is drawn from the round's validator set with
//! probability proportional to stake. The draw is seeded with the hash of a
//! block a fixed number of heights back, so every node holding the same
//! chain computes the same proposer without any extra messages.
//!
//! ## How It Works
//!
//! 1. Seed a ChaCha20 generator with the 32 bytes of the seed block's hash
//! 2. Draw a point uniformly in `[0, total_stake)`
//! 3. Walk the validators in address order, accumulating stake, and pick
//!    the first whose cumulative stake exceeds the point
//!
//! Validators with zero stake occupy no interval and are never selected.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use stakebft_types::{Address, ValidatorSet, H256};
use thiserror::Error;
use tracing::trace;

/// Errors that can occur during proposer selection
#[derive(Debug, Error)]
pub enum ProposerError {
    /// No validator holds stake
    #[error("Empty validator set")]
    EmptyValidatorSet,

    /// Summing stakes overflowed
    #[error("Total stake overflows u64")]
    StakeOverflow,
}

/// Result type for proposer operations
pub type ProposerResult<T> = Result<T, ProposerError>;

/// Height of the block whose hash seeds the draw for round `number`.
///
/// Rounds within `lookback` of genesis use the genesis block.
pub fn seed_number(number: u64, lookback: u64) -> u64 {
    number.saturating_sub(lookback)
}

/// Picks a proposer from `validators`, weighted by stake.
///
/// Pure: the same set and seed always give the same address.
pub fn select_proposer(validators: &ValidatorSet, seed: &H256) -> ProposerResult<Address> {
    let total = validators
        .values()
        .try_fold(0u64, |acc, stake| acc.checked_add(*stake))
        .ok_or(ProposerError::StakeOverflow)?;
    if total == 0 {
        return Err(ProposerError::EmptyValidatorSet);
    }

    let mut rng = ChaCha20Rng::from_seed(*seed.as_fixed_bytes());
    let point = rng.gen_range(0..total);

    let mut cumulative = 0u64;
    for (address, stake) in validators {
        cumulative += stake;
        if point < cumulative {
            trace!(%address, point, total, "selected proposer");
            return Ok(*address);
        }
    }
    Err(ProposerError::EmptyValidatorSet)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    #[test]
    fn test_seed_number_saturates_at_genesis() {
        assert_eq!(seed_number(1, 5), 0);
        assert_eq!(seed_number(5, 5), 0);
        assert_eq!(seed_number(6, 5), 1);
        assert_eq!(seed_number(100, 5), 95);
    }

    #[test]
    fn test_zero_stake_is_never_selected() {
        let mut set = ValidatorSet::new();
        set.insert(addr(1), 0);
        set.insert(addr(2), 10);
        for i in 0..64u8 {
            let seed = H256::keccak256(&[i]);
            assert_eq!(select_proposer(&set, &seed).unwrap(), addr(2));
        }
    }

    #[test]
    fn test_all_zero_stake_is_empty() {
        let mut set = ValidatorSet::new();
        set.insert(addr(1), 0);
        assert!(matches!(
            select_proposer(&set, &H256::NIL),
            Err(ProposerError::EmptyValidatorSet)
        ));
    }
}
