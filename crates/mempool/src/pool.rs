//! Pending transaction pool and the deterministic ordering algorithm.
//!
//! Transactions are grouped per signer. [`TransactionOrderer::ordered_batch`]
//! sorts each group locally and then merges the groups pairwise by
//! timestamp, admitting a transaction only when it is causally ready:
//!
//! - its nonce is `-1`, or
//! - its nonce is one more than the last admitted nonce of its address, or
//! - its address has no nonce yet and its nonce is `0`.
//!
//! Every merge step seeds readiness from the committed tracker, so the
//! output is a pure function of the pool contents and the committed chain.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};

use stakebft_types::{Address, Block, Transaction, H256};
use tracing::{debug, info, trace, warn};

use crate::tracker::{NonceTrackers, TxStatus};
use crate::{MempoolError, Result};

/// Orderer configuration
#[derive(Debug, Clone)]
pub struct OrdererConfig {
    /// Pooled transactions older than this (relative to the last committed
    /// block's timestamp) are dropped
    pub pool_timeout_ms: u64,
    /// Tracker entries older than this are forgotten, committed ones
    /// included. Must not be shorter than `pool_timeout_ms`, since the
    /// pool timeout is what keeps a forgotten transaction from returning.
    pub tracker_timeout_ms: u64,
}

impl Default for OrdererConfig {
    fn default() -> Self {
        Self {
            pool_timeout_ms: 60 * 60 * 1000,       // 1 hour
            tracker_timeout_ms: 24 * 60 * 60 * 1000, // 1 day
        }
    }
}

/// Pending transactions, nonce trackers and the transaction tracker.
#[derive(Debug, Default)]
pub struct TransactionOrderer {
    config: OrdererConfig,
    pool: BTreeMap<Address, Vec<Transaction>>,
    tracker: HashMap<H256, TxStatus>,
    nonces: NonceTrackers,
    last_block_timestamp: u64,
}

impl TransactionOrderer {
    /// Creates an empty orderer.
    pub fn new(config: OrdererConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &OrdererConfig {
        &self.config
    }

    /// Adds a transaction to the pool.
    ///
    /// Returns `false` (and logs) when the signature does not verify, the
    /// transaction is already tracked or it is past the pool timeout.
    pub fn add(&mut self, tx: Transaction) -> bool {
        match self.try_add(tx) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "transaction not added to pool");
                false
            }
        }
    }

    fn try_add(&mut self, tx: Transaction) -> Result<()> {
        tx.verify()
            .map_err(|e| MempoolError::InvalidSignature(e.to_string()))?;
        if self.tracker.contains_key(&tx.hash) {
            return Err(MempoolError::AlreadyExists(tx.hash));
        }
        self.check_fresh(&tx)?;
        trace!(hash = %tx.hash, address = %tx.address, nonce = tx.nonce, "pooled transaction");
        self.nonces.observe_pending(&tx);
        self.tracker.insert(
            tx.hash,
            TxStatus::Pool {
                address: tx.address,
                timestamp: tx.timestamp,
            },
        );
        self.pool.entry(tx.address).or_default().push(tx);
        Ok(())
    }

    /// Whether `tx` may enter the pool: not tracked already, not past the
    /// pool timeout and, for ordered transactions, above the committed
    /// nonce of its address.
    pub fn is_eligible(&self, tx: &Transaction) -> bool {
        match self.check_eligible(tx) {
            Ok(()) => true,
            Err(e) => {
                debug!(hash = %tx.hash, error = %e, "transaction not eligible");
                false
            }
        }
    }

    fn check_eligible(&self, tx: &Transaction) -> Result<()> {
        if self.tracker.contains_key(&tx.hash) {
            return Err(MempoolError::AlreadyExists(tx.hash));
        }
        self.check_fresh(tx)?;
        if tx.is_ordered() {
            if let Some(committed) = self.nonces.committed(&tx.address) {
                if tx.nonce <= committed {
                    return Err(MempoolError::NonceTooLow {
                        committed,
                        actual: tx.nonce,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_fresh(&self, tx: &Transaction) -> Result<()> {
        if timed_out(tx.timestamp, self.config.pool_timeout_ms, self.last_block_timestamp) {
            return Err(MempoolError::TimedOut {
                hash: tx.hash,
                timestamp: tx.timestamp,
                last_block_timestamp: self.last_block_timestamp,
            });
        }
        Ok(())
    }

    /// Deterministic, nonce-causal ordering of the whole pool.
    pub fn ordered_batch(&self) -> Vec<Transaction> {
        let mut lists: VecDeque<Vec<Transaction>> =
            self.pool.values().map(|txs| sort_address_list(txs)).collect();
        while lists.len() > 1 {
            let (Some(first), Some(second)) = (lists.pop_front(), lists.pop_front()) else {
                break;
            };
            lists.push_back(self.merge(first, second));
        }
        let Some(list) = lists.pop_front() else {
            return Vec::new();
        };
        let mut ready = self.nonces.committed_map();
        list.into_iter()
            .filter(|tx| admit(&mut ready, tx))
            .collect()
    }

    fn merge(&self, first: Vec<Transaction>, second: Vec<Transaction>) -> Vec<Transaction> {
        let mut ready = self.nonces.committed_map();
        let mut out = Vec::with_capacity(first.len() + second.len());
        let mut a = first.into_iter().peekable();
        let mut b = second.into_iter().peekable();
        loop {
            let take_first = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => x.timestamp <= y.timestamp,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_first { a.next() } else { b.next() };
            if let Some(tx) = next {
                if admit(&mut ready, &tx) {
                    out.push(tx);
                }
            }
        }
        out
    }

    /// Applies a committed block: advances committed nonces, records where
    /// each transaction landed, removes them from the pool and runs timeout
    /// eviction. Applying the same block twice changes nothing.
    pub fn cleanup_for_block(&mut self, block: &Block) {
        let number = block.number();
        let mut removed = 0usize;
        for list in [&block.transactions, &block.last_votes] {
            for (index, tx) in list.iter().enumerate() {
                self.nonces.observe_committed(tx);
                self.tracker.insert(
                    tx.hash,
                    TxStatus::Block {
                        number,
                        index,
                        timestamp: tx.timestamp,
                    },
                );
                removed += self.remove_from_pool(&tx.address, &tx.hash);
            }
        }
        self.last_block_timestamp = self.last_block_timestamp.max(block.timestamp());
        let evicted = self.evict_timed_out(self.last_block_timestamp);
        if removed > 0 || evicted > 0 {
            self.nonces.rebuild_pending(self.pool.values().flatten());
            info!(number, removed, evicted, remaining = self.len(), "cleaned pool for block");
        }
    }

    fn remove_from_pool(&mut self, address: &Address, hash: &H256) -> usize {
        let Some(list) = self.pool.get_mut(address) else {
            return 0;
        };
        let before = list.len();
        list.retain(|tx| &tx.hash != hash);
        let removed = before - list.len();
        if list.is_empty() {
            self.pool.remove(address);
        }
        removed
    }

    /// Drops pooled transactions and tracker entries that timed out relative
    /// to `last_block_timestamp`. Returns the number of pooled transactions
    /// dropped.
    fn evict_timed_out(&mut self, last_block_timestamp: u64) -> usize {
        let pool_timeout = self.config.pool_timeout_ms;
        let tracker_timeout = self.config.tracker_timeout_ms;

        let mut evicted = 0;
        self.pool.retain(|address, list| {
            let before = list.len();
            list.retain(|tx| !timed_out(tx.timestamp, pool_timeout, last_block_timestamp));
            if list.len() < before {
                warn!(%address, dropped = before - list.len(), "evicted timed out transactions");
            }
            evicted += before - list.len();
            !list.is_empty()
        });

        self.tracker
            .retain(|_, status| !timed_out(status.timestamp(), tracker_timeout, last_block_timestamp));
        evicted
    }

    /// Next nonce `address` should use for a new ordered transaction.
    pub fn next_nonce(&self, address: &Address) -> i64 {
        self.nonces.pending(address).map_or(0, |n| n + 1)
    }

    /// Nonce trackers.
    pub fn nonces(&self) -> &NonceTrackers {
        &self.nonces
    }

    /// Tracker status of `hash`.
    pub fn status(&self, hash: &H256) -> Option<TxStatus> {
        self.tracker.get(hash).copied()
    }

    /// True once `hash` is recorded in a committed block, until its tracker
    /// entry times out.
    pub fn is_finalized(&self, hash: &H256) -> bool {
        self.status(hash).is_some_and(|s| s.is_committed())
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.pool.values().map(Vec::len).sum()
    }

    /// True if nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

fn timed_out(timestamp: u64, timeout: u64, last_block_timestamp: u64) -> bool {
    last_block_timestamp >= timestamp.saturating_add(timeout)
}

/// Admits `tx` if it is causally ready and advances the tracker.
fn admit(ready: &mut BTreeMap<Address, i64>, tx: &Transaction) -> bool {
    if !tx.is_ordered() {
        return true;
    }
    let ok = match ready.get(&tx.address) {
        Some(last) => tx.nonce == last + 1,
        None => tx.nonce == 0,
    };
    if ok {
        ready.insert(tx.address, tx.nonce);
    } else {
        debug!(
            hash = %tx.hash,
            address = %tx.address,
            nonce = tx.nonce,
            last = ?ready.get(&tx.address),
            "skipping transaction that is not causally ready"
        );
    }
    ok
}

/// Local order for one address: by nonce when every transaction is
/// ordered, by timestamp otherwise. Ties break on hash.
fn sort_address_list(txs: &[Transaction]) -> Vec<Transaction> {
    let mut sorted = txs.to_vec();
    let all_ordered = sorted.iter().all(Transaction::is_ordered);
    sorted.sort_by(|a, b| {
        let primary = if all_ordered {
            a.nonce.cmp(&b.nonce).then(a.timestamp.cmp(&b.timestamp))
        } else {
            a.timestamp.cmp(&b.timestamp)
        };
        match primary {
            Ordering::Equal => a.hash.cmp(&b.hash),
            other => other,
        }
    });
    sorted
}
