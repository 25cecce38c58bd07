//! Nonce trackers and per-transaction status.

use std::collections::BTreeMap;

use stakebft_types::{Address, Transaction};

/// Where a tracked transaction currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Waiting in the pool
    Pool {
        /// Signer
        address: Address,
        /// Transaction timestamp
        timestamp: u64,
    },
    /// Committed in block `number` at `index` within its list
    Block {
        /// Block height
        number: u64,
        /// Position within the block's transaction or vote list
        index: usize,
        /// Transaction timestamp
        timestamp: u64,
    },
}

impl TxStatus {
    /// Timestamp of the tracked transaction.
    pub fn timestamp(&self) -> u64 {
        match *self {
            Self::Pool { timestamp, .. } | Self::Block { timestamp, .. } => timestamp,
        }
    }

    /// True once the transaction is in a committed block.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

/// Highest nonce per address, for the committed chain and for the pool.
///
/// `pending[addr] >= committed[addr]` holds whenever both are present.
#[derive(Debug, Clone, Default)]
pub struct NonceTrackers {
    committed: BTreeMap<Address, i64>,
    pending: BTreeMap<Address, i64>,
}

impl NonceTrackers {
    /// Highest committed nonce of `address`.
    pub fn committed(&self, address: &Address) -> Option<i64> {
        self.committed.get(address).copied()
    }

    /// Highest nonce seen for `address`, committed or pooled.
    pub fn pending(&self, address: &Address) -> Option<i64> {
        self.pending.get(address).copied()
    }

    /// Copy of the committed map, used to seed readiness checks.
    pub fn committed_map(&self) -> BTreeMap<Address, i64> {
        self.committed.clone()
    }

    pub(crate) fn observe_pending(&mut self, tx: &Transaction) {
        if tx.is_ordered() {
            bump(&mut self.pending, tx.address, tx.nonce);
        }
    }

    pub(crate) fn observe_committed(&mut self, tx: &Transaction) {
        if tx.is_ordered() {
            bump(&mut self.committed, tx.address, tx.nonce);
            bump(&mut self.pending, tx.address, tx.nonce);
        }
    }

    /// Recomputes `pending` from `committed` plus every pooled transaction.
    pub(crate) fn rebuild_pending<'a>(&mut self, pooled: impl Iterator<Item = &'a Transaction>) {
        self.pending = self.committed.clone();
        for tx in pooled.filter(|tx| tx.is_ordered()) {
            bump(&mut self.pending, tx.address, tx.nonce);
        }
    }
}

fn bump(map: &mut BTreeMap<Address, i64>, address: Address, nonce: i64) {
    let entry = map.entry(address).or_insert(nonce);
    *entry = (*entry).max(nonce);
}
