//! State store collaborator
//!
//! The consensus engine reads and writes the shared state tree through the
//! [`StateStore`] trait. [`MemoryStateStore`] is the in-process
//! implementation: a JSON tree behind an `Arc`, so taking a snapshot is a
//! pointer copy and applying a transaction copies the tree only while a
//! snapshot still shares it.
//!
//! Writes to reserved `/consensus` paths run built-in functions:
//! - `prevote/{addr}` and `precommit/{addr}` add the voter's stake to the
//!   round's sum the first time the voter writes
//! - `next_round_validators` publishes the next round's validator set and
//!   total stake
//! - `next_round_proposer` publishes the next round's proposer
//! - `propose` advances `/consensus/latest_number`

use std::sync::Arc;

use serde_json::{Map, Value};
use stakebft_types::paths::{segments, CONSENSUS_ROOT};
use stakebft_types::{Address, Block, ConsensusPath, Transaction, ValidatorSet};
use tracing::{debug, trace, warn};

use crate::{Result, StorageError};

/// Read/write access to the replicated state tree.
pub trait StateStore: Send + Sync {
    /// Immutable view of the whole tree.
    type Snapshot: Clone + Send + Sync;

    /// Value at `path`, if any.
    fn get_value(&self, path: &str) -> Option<Value>;

    /// Raw write that bypasses built-in functions.
    fn write_database(&mut self, path: &str, value: Value) -> Result<()>;

    /// Applies every write of `tx` atomically.
    fn execute_transaction(&mut self, tx: &Transaction) -> Result<()>;

    /// Snapshot of the current tree.
    fn create_snapshot(&self) -> Self::Snapshot;

    /// Snapshot of the last finalized tree.
    fn finalized_snapshot(&self) -> Self::Snapshot;

    /// Applies `block` to the finalized tree. `None` if any transaction fails.
    fn verify_block_on_snapshot(&self, block: &Block) -> Option<Self::Snapshot>;

    /// Replaces the current tree.
    fn set_db_to_snapshot(&mut self, snapshot: Self::Snapshot);

    /// Marks `snapshot` as the finalized tree.
    fn finalize(&mut self, snapshot: Self::Snapshot);

    /// Unsigned integer at `path`.
    fn get_u64(&self, path: &str) -> Option<u64> {
        self.get_value(path)?.as_u64()
    }

    /// Validator set recorded for round `number`.
    fn validators(&self, number: u64) -> Option<ValidatorSet> {
        let value = self.get_value(&ConsensusPath::Validators(number).to_string())?;
        serde_json::from_value(value).ok()
    }

    /// Proposer recorded for round `number`.
    fn stored_proposer(&self, number: u64) -> Option<Address> {
        self.get_value(&ConsensusPath::Proposer(number).to_string())?
            .as_str()?
            .parse()
            .ok()
    }
}

/// Snapshot of a [`MemoryStateStore`].
#[derive(Debug, Clone)]
pub struct MemorySnapshot(Arc<Value>);

impl MemorySnapshot {
    /// Value at `path` inside the snapshot.
    pub fn get(&self, path: &str) -> Option<Value> {
        lookup(&self.0, path).cloned()
    }
}

/// In-memory state tree with copy-on-write snapshots.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    root: Arc<Value>,
    finalized: Arc<Value>,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        let empty = Arc::new(Value::Object(Map::new()));
        Self {
            root: empty.clone(),
            finalized: empty,
        }
    }
}

impl MemoryStateStore {
    /// Empty state tree.
    pub fn new() -> Self {
        Self::default()
    }

    fn from_root(root: Arc<Value>) -> Self {
        Self {
            finalized: root.clone(),
            root,
        }
    }
}

impl StateStore for MemoryStateStore {
    type Snapshot = MemorySnapshot;

    fn get_value(&self, path: &str) -> Option<Value> {
        lookup(&self.root, path).cloned()
    }

    fn write_database(&mut self, path: &str, value: Value) -> Result<()> {
        assign(Arc::make_mut(&mut self.root), path, value)
    }

    fn execute_transaction(&mut self, tx: &Transaction) -> Result<()> {
        let mut draft = (*self.root).clone();
        for (path, value) in tx.operation.writes() {
            apply_write(&mut draft, &tx.address, path, value)?;
        }
        trace!(hash = %tx.hash, address = %tx.address, "executed transaction");
        self.root = Arc::new(draft);
        Ok(())
    }

    fn create_snapshot(&self) -> MemorySnapshot {
        MemorySnapshot(self.root.clone())
    }

    fn finalized_snapshot(&self) -> MemorySnapshot {
        MemorySnapshot(self.finalized.clone())
    }

    fn verify_block_on_snapshot(&self, block: &Block) -> Option<MemorySnapshot> {
        let mut scratch = Self::from_root(self.finalized.clone());
        for tx in block.last_votes.iter().chain(&block.transactions) {
            if let Err(e) = tx.verify() {
                warn!(number = block.number(), tx = %tx.hash, error = %e, "block carries invalid transaction");
                return None;
            }
            if let Err(e) = scratch.execute_transaction(tx) {
                warn!(number = block.number(), tx = %tx.hash, error = %e, "block transaction failed on snapshot");
                return None;
            }
        }
        Some(MemorySnapshot(scratch.root))
    }

    fn set_db_to_snapshot(&mut self, snapshot: MemorySnapshot) {
        self.root = snapshot.0;
    }

    fn finalize(&mut self, snapshot: MemorySnapshot) {
        self.finalized = snapshot.0;
    }
}

fn apply_write(root: &mut Value, signer: &Address, path: &str, value: &Value) -> Result<()> {
    let Some(reserved) = ConsensusPath::parse(path) else {
        if path.starts_with(CONSENSUS_ROOT) {
            return Err(denied(path, "unknown consensus path"));
        }
        return assign(root, path, value.clone());
    };

    match reserved {
        ConsensusPath::Prevote(number, voter) => {
            record_vote(root, signer, path, value, number, voter, ConsensusPath::PrevoteSum(number))
        }
        ConsensusPath::Precommit(number, voter) => {
            record_vote(root, signer, path, value, number, voter, ConsensusPath::PrecommitSum(number))
        }
        ConsensusPath::Propose(number) => {
            check_proposer(root, signer, path, number)?;
            if value.get("block_hash").and_then(Value::as_str).is_none() {
                return Err(invalid(path, "proposal without block_hash"));
            }
            assign(root, path, value.clone())?;
            let latest_path = ConsensusPath::LatestNumber.to_string();
            let latest = lookup(root, &latest_path).and_then(Value::as_u64).unwrap_or(0);
            assign(root, &latest_path, Value::from(latest.max(number)))
        }
        ConsensusPath::NextRoundValidators(number) => {
            check_proposer(root, signer, path, number)?;
            let next = next_number(path, number)?;
            let validators: ValidatorSet = serde_json::from_value(value.clone())
                .map_err(|e| invalid(path, &e.to_string()))?;
            let total = validators
                .values()
                .try_fold(0u64, |acc, stake| acc.checked_add(*stake))
                .ok_or_else(|| invalid(path, "total stake overflows"))?;
            assign(root, path, value.clone())?;
            assign(root, &ConsensusPath::Validators(next).to_string(), value.clone())?;
            assign(root, &ConsensusPath::TotalAtStake(next).to_string(), Value::from(total))
        }
        ConsensusPath::NextRoundProposer(number) => {
            check_proposer(root, signer, path, number)?;
            let next = next_number(path, number)?;
            if value.as_str().and_then(|s| s.parse::<Address>().ok()).is_none() {
                return Err(invalid(path, "next proposer is not an address"));
            }
            assign(root, path, value.clone())?;
            assign(root, &ConsensusPath::Proposer(next).to_string(), value.clone())
        }
        ConsensusPath::Validators(_) | ConsensusPath::TotalAtStake(_) | ConsensusPath::Proposer(_) => {
            let conflicting = lookup(root, path).is_some_and(|existing| existing != value);
            if conflicting {
                return Err(denied(path, "already set"));
            }
            assign(root, path, value.clone())
        }
        ConsensusPath::PrevoteSum(_) | ConsensusPath::PrecommitSum(_) | ConsensusPath::LatestNumber => {
            Err(denied(path, "maintained by built-in functions"))
        }
    }
}

fn record_vote(
    root: &mut Value,
    signer: &Address,
    path: &str,
    value: &Value,
    number: u64,
    voter: Address,
    sum: ConsensusPath,
) -> Result<()> {
    if voter != *signer {
        return Err(denied(path, "votes may only be cast for the signer"));
    }
    let stake = value
        .as_u64()
        .ok_or_else(|| invalid(path, "stake must be an unsigned integer"))?;
    let stake_path = format!("{}/{}", ConsensusPath::Validators(number), voter);
    let expected = lookup(root, &stake_path)
        .and_then(Value::as_u64)
        .ok_or_else(|| denied(path, "voter is not a validator of the round"))?;
    if stake != expected {
        return Err(invalid(path, &format!("stake {stake} does not match {expected}")));
    }
    if lookup(root, path).is_some() {
        debug!(path, "vote already recorded");
        return Ok(());
    }
    assign(root, path, value.clone())?;
    let sum_path = sum.to_string();
    let tallied = lookup(root, &sum_path).and_then(Value::as_u64).unwrap_or(0);
    let tallied = tallied
        .checked_add(stake)
        .ok_or_else(|| invalid(path, "vote sum overflows"))?;
    assign(root, &sum_path, Value::from(tallied))
}

fn next_number(path: &str, number: u64) -> Result<u64> {
    number
        .checked_add(1)
        .ok_or_else(|| invalid(path, "round number overflows"))
}

fn check_proposer(root: &Value, signer: &Address, path: &str, number: u64) -> Result<()> {
    let proposer = lookup(root, &ConsensusPath::Proposer(number).to_string())
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Address>().ok());
    match proposer {
        Some(proposer) if proposer != *signer => Err(denied(path, "signer is not the round's proposer")),
        _ => Ok(()),
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .into_iter()
        .try_fold(root, |node, key| node.as_object()?.get(key))
}

/// Writes `value` at `path`, creating intermediate objects. `null` deletes.
fn assign(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let keys = segments(path);
    let Some((leaf, parents)) = keys.split_last() else {
        return Err(invalid(path, "cannot overwrite the root"));
    };
    let mut node = root;
    for key in parents {
        node = object_mut(node, path)?
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = object_mut(node, path)?;
    if value.is_null() {
        map.remove(*leaf);
    } else {
        map.insert((*leaf).to_string(), value);
    }
    Ok(())
}

fn object_mut<'a>(node: &'a mut Value, path: &str) -> Result<&'a mut Map<String, Value>> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut()
        .ok_or_else(|| invalid(path, "parent is not an object"))
}

fn denied(path: &str, reason: &str) -> StorageError {
    StorageError::PermissionDenied {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn invalid(path: &str, reason: &str) -> StorageError {
    StorageError::InvalidValue {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assign_creates_and_deletes() {
        let mut root = json!({});
        assign(&mut root, "/a/b/c", json!(1)).unwrap();
        assert_eq!(lookup(&root, "/a/b/c"), Some(&json!(1)));
        assign(&mut root, "/a/b/c", Value::Null).unwrap();
        assert_eq!(lookup(&root, "/a/b/c"), None);
        assert!(assign(&mut root, "/", json!(1)).is_err());
    }

    #[test]
    fn assign_replaces_scalar_parents() {
        let mut root = json!({"a": 5});
        assign(&mut root, "/a/b", json!(true)).unwrap();
        assert_eq!(root, json!({"a": {"b": true}}));
    }
}
