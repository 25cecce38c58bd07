//! Vote ledger and quorum detection.
//!
//! The ledger keeps every accepted consensus transaction keyed by round.
//! After a commit resets the state tree to the finalized snapshot, the
//! engine replays the ledger from the committed round upward so votes that
//! arrived early are not lost. A round's records also become the
//! `last_votes` of the block that follows it.

use std::collections::BTreeMap;

use stakebft_types::{Address, Transaction, H256};
use tracing::trace;

use crate::types::{VoteKind, VoteRecord};

/// Returns true when `tallied` stake reaches two thirds of `total`.
///
/// Uses integer division: `tallied >= total * 2 / 3`.
pub fn quorum(tallied: u64, total: u64) -> bool {
    u128::from(tallied) >= u128::from(total) * 2 / 3
}

/// Consensus transactions collected per round.
#[derive(Debug, Clone, Default)]
pub struct VoteLedger {
    rounds: BTreeMap<u64, Vec<VoteRecord>>,
}

impl VoteLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a ledger from exported rounds.
    pub fn from_rounds(rounds: BTreeMap<u64, Vec<VoteRecord>>) -> Self {
        Self { rounds }
    }

    /// Records `record` under `number`. Returns false if a transaction with
    /// the same hash is already recorded for that round.
    pub fn add_vote(&mut self, number: u64, record: VoteRecord) -> bool {
        let round = self.rounds.entry(number).or_default();
        if round.iter().any(|r| r.tx.hash == record.tx.hash) {
            return false;
        }
        trace!(number, kind = ?record.kind, tx = %record.tx.hash, "recorded vote");
        round.push(record);
        true
    }

    /// Whether a transaction with `hash` is recorded for `number`.
    pub fn contains(&self, number: u64, hash: &H256) -> bool {
        self.rounds
            .get(&number)
            .is_some_and(|round| round.iter().any(|r| r.tx.hash == *hash))
    }

    /// Removes the transaction with `hash` from `number`.
    pub fn remove(&mut self, number: u64, hash: &H256) -> bool {
        let Some(round) = self.rounds.get_mut(&number) else {
            return false;
        };
        let before = round.len();
        round.retain(|r| r.tx.hash != *hash);
        let removed = round.len() != before;
        if round.is_empty() {
            self.rounds.remove(&number);
        }
        removed
    }

    /// Records of round `number`, in arrival order.
    pub fn votes(&self, number: u64) -> &[VoteRecord] {
        self.rounds.get(&number).map_or(&[], Vec::as_slice)
    }

    /// Proposals recorded for `number`, in arrival order.
    pub fn proposals(&self, number: u64) -> impl Iterator<Item = &VoteRecord> {
        self.votes(number)
            .iter()
            .filter(|r| r.kind == VoteKind::Proposal)
    }

    /// Whether `address` already cast a vote of `kind` in `number`.
    pub fn has_voted(&self, number: u64, kind: VoteKind, address: &Address) -> bool {
        self.votes(number)
            .iter()
            .any(|r| r.kind == kind && r.tx.address == *address)
    }

    /// Transactions of round `number`, for the next block's `last_votes`.
    pub fn transactions(&self, number: u64) -> Vec<Transaction> {
        self.votes(number).iter().map(|r| r.tx.clone()).collect()
    }

    /// Rounds at or above `number`, lowest first.
    pub fn rounds_from(&self, number: u64) -> impl Iterator<Item = (u64, &[VoteRecord])> {
        self.rounds
            .range(number..)
            .map(|(n, records)| (*n, records.as_slice()))
    }

    /// Drops every round below `number`. Returns how many were dropped.
    pub fn cleanup_votes(&mut self, number: u64) -> usize {
        let keep = self.rounds.split_off(&number);
        let dropped = self.rounds.len();
        self.rounds = keep;
        dropped
    }

    /// Copy of every round, for export.
    pub fn export(&self) -> BTreeMap<u64, Vec<VoteRecord>> {
        self.rounds.clone()
    }

    /// Number of rounds held.
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::vote_transaction;
    use stakebft_types::Keypair;

    fn record(key: &Keypair, kind: VoteKind, number: u64) -> VoteRecord {
        VoteRecord {
            kind,
            tx: vote_transaction(key, kind, number, 10).unwrap(),
            block: None,
        }
    }

    #[test]
    fn test_quorum_boundary() {
        assert!(quorum(6, 9));
        assert!(!quorum(5, 9));
        assert!(quorum(266, 400));
        assert!(!quorum(200, 400));
        assert!(quorum(u64::MAX, u64::MAX));
    }

    #[test]
    fn test_add_vote_deduplicates_by_hash() {
        let key = Keypair::random();
        let mut ledger = VoteLedger::new();
        let r = record(&key, VoteKind::Prevote, 3);
        assert!(ledger.add_vote(3, r.clone()));
        assert!(!ledger.add_vote(3, r.clone()));
        assert!(ledger.add_vote(4, r));
        assert_eq!(ledger.votes(3).len(), 1);
        assert!(ledger.has_voted(3, VoteKind::Prevote, &key.address()));
        assert!(!ledger.has_voted(3, VoteKind::Precommit, &key.address()));
    }

    #[test]
    fn test_cleanup_votes_keeps_current_and_future() {
        let key = Keypair::random();
        let mut ledger = VoteLedger::new();
        for n in 1..=5 {
            ledger.add_vote(n, record(&key, VoteKind::Prevote, n));
        }
        assert_eq!(ledger.cleanup_votes(3), 2);
        let rounds: Vec<u64> = ledger.rounds_from(0).map(|(n, _)| n).collect();
        assert_eq!(rounds, vec![3, 4, 5]);
    }

    #[test]
    fn test_remove_drops_empty_round() {
        let key = Keypair::random();
        let mut ledger = VoteLedger::new();
        let r = record(&key, VoteKind::Precommit, 2);
        let hash = r.tx.hash;
        ledger.add_vote(2, r);
        assert!(ledger.remove(2, &hash));
        assert_eq!(ledger.round_count(), 0);
        assert!(!ledger.remove(2, &hash));
    }
}
