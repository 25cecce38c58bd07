//! Blocks, header hashing and genesis construction.
//!
//! - [`BlockHeader`] - the hashed part of a block
//! - [`Block`] - header plus the previous round's votes and this block's transactions
//! - [`GenesisSpec`] - the fixed configuration genesis is derived from
//!
//! Header hashes are computed over a canonical JSON encoding in which every
//! object's keys are sorted. Validator sets are `BTreeMap`s for the same
//! reason: two nodes holding the same logical block always hash identical
//! bytes.

use crate::paths::{ConsensusPath, STAKING_VALIDATORS};
use crate::{Address, Error, Keypair, Operation, Result, Transaction, H256, UNORDERED_NONCE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Validator set snapshot: address to stake.
pub type ValidatorSet = BTreeMap<Address, u64>;

/// The hashed portion of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the previous block (NIL for genesis)
    pub last_hash: H256,
    /// Hash of the previous round's vote transactions
    pub last_votes_hash: H256,
    /// Hash of this block's transaction list
    pub transactions_hash: H256,
    /// Height, genesis is 0
    pub number: u64,
    /// Creation time in milliseconds
    pub timestamp: u64,
    /// Address of the proposer
    pub proposer: Address,
    /// Validator set the block was proposed under
    pub validators: ValidatorSet,
    /// Length in bytes of the serialized transaction list
    pub size: u64,
}

impl BlockHeader {
    /// Keccak-256 of the canonical header encoding.
    pub fn hash(&self) -> H256 {
        canonical_hash(self).unwrap_or_else(|e| {
            // Only reachable if serialization of plain data fails.
            warn!(number = self.number, error = %e, "failed to encode block header");
            H256::NIL
        })
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} (last: {}, proposer: {}, {} validators)",
            self.number,
            self.last_hash,
            self.proposer,
            self.validators.len()
        )
    }
}

/// A block: header, body and the declared header hash.
///
/// Blocks parsed from the wire or from disk keep whatever hash they declare
/// until [`Block::validate_hashes`] is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Header
    pub header: BlockHeader,
    /// Votes that finalized the previous block
    pub last_votes: Vec<Transaction>,
    /// Ordinary transactions
    pub transactions: Vec<Transaction>,
    /// Declared header hash
    pub hash: H256,
}

impl Block {
    /// Builds a block stamped with the current wall-clock time.
    pub fn create(
        last_hash: H256,
        last_votes: Vec<Transaction>,
        transactions: Vec<Transaction>,
        number: u64,
        proposer: Address,
        validators: ValidatorSet,
    ) -> Self {
        Self::new(
            last_hash,
            last_votes,
            transactions,
            number,
            now_millis(),
            proposer,
            validators,
        )
    }

    /// Builds a block with an explicit timestamp.
    pub fn new(
        last_hash: H256,
        last_votes: Vec<Transaction>,
        transactions: Vec<Transaction>,
        number: u64,
        timestamp: u64,
        proposer: Address,
        validators: ValidatorSet,
    ) -> Self {
        let header = BlockHeader {
            last_hash,
            last_votes_hash: hash_transactions(&last_votes),
            transactions_hash: hash_transactions(&transactions),
            number,
            timestamp,
            proposer,
            validators,
            size: encoded_len(&transactions),
        };
        let hash = Self::compute_hash(&header);
        Self {
            header,
            last_votes,
            transactions,
            hash,
        }
    }

    /// Height of the block.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Hash of the previous block.
    pub fn last_hash(&self) -> H256 {
        self.header.last_hash
    }

    /// Creation timestamp.
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Hash of a header. Pure function of the header fields.
    pub fn compute_hash(header: &BlockHeader) -> H256 {
        header.hash()
    }

    /// Recomputed hash of this block's header.
    pub fn header_hash(&self) -> H256 {
        Self::compute_hash(&self.header)
    }

    /// Recomputes the header hash, transaction hash and vote hash and
    /// compares them with the declared values.
    pub fn validate_hashes(&self) -> bool {
        if self.header_hash() != self.hash {
            warn!(number = self.number(), hash = %self.hash, "block hash mismatch");
            return false;
        }
        if hash_transactions(&self.transactions) != self.header.transactions_hash {
            warn!(number = self.number(), "transactions hash mismatch");
            return false;
        }
        if hash_transactions(&self.last_votes) != self.header.last_votes_hash {
            warn!(number = self.number(), "last votes hash mismatch");
            return false;
        }
        true
    }

    /// Validates a block proposed on top of a chain whose tip is `last_number`.
    ///
    /// Besides the hash checks, every address's ordered transactions must
    /// step by exactly one from the first nonce seen for that address.
    pub fn validate_proposed_block(&self, last_number: u64) -> bool {
        if !self.validate_hashes() {
            return false;
        }
        if self.number() != last_number + 1 {
            warn!(
                number = self.number(),
                expected = last_number + 1,
                "proposed block number is not sequential"
            );
            return false;
        }
        let mut last_nonce: HashMap<Address, i64> = HashMap::new();
        for tx in self.transactions.iter().filter(|tx| tx.is_ordered()) {
            if let Some(prev) = last_nonce.get(&tx.address) {
                if tx.nonce != prev + 1 {
                    warn!(
                        number = self.number(),
                        address = %tx.address,
                        nonce = tx.nonce,
                        previous = prev,
                        "nonce sequence broken in proposed block"
                    );
                    return false;
                }
            }
            last_nonce.insert(tx.address, tx.nonce);
        }
        true
    }

    /// Parses a block from JSON. Malformed input yields `None`.
    pub fn from_json(bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice(bytes) {
            Ok(block) => Some(block),
            Err(e) => {
                debug!(error = %e, "discarding malformed block");
                None
            }
        }
    }

    /// JSON encoding used on disk and on the wire.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encoding(e.to_string()))
    }

    /// `{number}-{short last hash}-{short hash}.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.json",
            self.number(),
            self.last_hash().short(4),
            self.hash.short(4)
        )
    }

    /// Derives the genesis block from fixed configuration.
    ///
    /// The block holds a single setup transaction signed by the genesis
    /// owner. It writes the configured initial values, the staking table
    /// and the round-one validator set, total stake and proposer. Signing
    /// is deterministic, so the same `GenesisSpec` always yields the same bytes.
    pub fn genesis(spec: &GenesisSpec) -> Result<Self> {
        if spec.validators.is_empty() {
            return Err(Error::InvalidGenesis("validator set is empty".into()));
        }
        if spec.validators.values().any(|stake| *stake == 0) {
            return Err(Error::InvalidGenesis("validator with zero stake".into()));
        }
        let owner = spec.owner.address();
        let first_proposer = spec.first_proposer();
        if !spec.validators.contains_key(&first_proposer) {
            return Err(Error::InvalidGenesis(format!(
                "first proposer {first_proposer} is not a validator"
            )));
        }
        let total = spec
            .validators
            .values()
            .try_fold(0u64, |acc, stake| acc.checked_add(*stake))
            .ok_or_else(|| Error::InvalidGenesis("total stake overflows".into()))?;
        let validators = to_json_value(&spec.validators)?;

        let mut op_list: Vec<Operation> = spec
            .values
            .iter()
            .map(|(path, value)| Operation::set_value(path.clone(), value.clone()))
            .collect();
        op_list.push(Operation::set_value(STAKING_VALIDATORS, validators.clone()));
        op_list.push(Operation::set_value(
            ConsensusPath::Validators(1).to_string(),
            validators,
        ));
        op_list.push(Operation::set_value(
            ConsensusPath::TotalAtStake(1).to_string(),
            serde_json::Value::from(total),
        ));
        op_list.push(Operation::set_value(
            ConsensusPath::Proposer(1).to_string(),
            serde_json::Value::String(first_proposer.to_hex()),
        ));

        let setup = Transaction::sign(
            &spec.owner,
            UNORDERED_NONCE,
            spec.timestamp,
            Operation::Set { op_list },
        )?;
        Ok(Self::new(
            H256::NIL,
            Vec::new(),
            vec![setup],
            0,
            spec.timestamp,
            owner,
            ValidatorSet::new(),
        ))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} (hash: {}, {} txs, {} votes)",
            self.number(),
            self.hash,
            self.transactions.len(),
            self.last_votes.len()
        )
    }
}

/// Fixed configuration the genesis block is derived from.
#[derive(Debug, Clone)]
pub struct GenesisSpec {
    /// Key that signs the setup transaction
    pub owner: Keypair,
    /// Genesis timestamp in milliseconds
    pub timestamp: u64,
    /// Initial validator stakes
    pub validators: ValidatorSet,
    /// Proposer of block 1; see [`GenesisSpec::first_proposer`]
    pub proposer: Option<Address>,
    /// Initial state values keyed by path
    pub values: BTreeMap<String, serde_json::Value>,
}

impl GenesisSpec {
    /// Proposer for round one: the configured one, else the owner when it
    /// holds stake, else the lowest validator address.
    pub fn first_proposer(&self) -> Address {
        let owner = self.owner.address();
        self.proposer
            .or_else(|| self.validators.contains_key(&owner).then_some(owner))
            .or_else(|| self.validators.keys().next().copied())
            .unwrap_or(owner)
    }
}

/// Keccak-256 of the canonical encoding of a transaction list.
pub fn hash_transactions(txs: &[Transaction]) -> H256 {
    canonical_hash(&txs).unwrap_or(H256::NIL)
}

fn canonical_hash<T: Serialize>(value: &T) -> Result<H256> {
    let value = to_json_value(value)?;
    let bytes = serde_json::to_vec(&value).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(H256::keccak256(&bytes))
}

fn to_json_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::Encoding(e.to_string()))
}

fn encoded_len(txs: &[Transaction]) -> u64 {
    serde_json::to_vec(txs).map(|v| v.len() as u64).unwrap_or(0)
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
