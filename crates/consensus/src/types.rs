//! Consensus-specific types.
//!
//! - [`Step`] - position of a node within a round
//! - [`VoteKind`] - proposal, prevote or precommit
//! - [`ConsensusTx`] - typed view of a vote transaction
//! - [`VoteRecord`] - a vote transaction as kept in the ledger
//! - [`ConsensusSnapshot`] - exportable view of a node's consensus state

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use stakebft_types::{
    now_millis, Address, Block, ConsensusPath, Keypair, Operation, Transaction, ValidatorSet, H256,
    UNORDERED_NONCE,
};

use crate::engine::{ConsensusError, ConsensusResult};

/// Consensus step within a round.
///
/// Steps advance strictly forward within a round:
///
/// ```text
/// NewNumber -> Propose -> Prevote -> Precommit -> Commit
///     ^                                             |
///     |_____________________________________________|
///                     (block committed)
/// ```
///
/// The derived ordering follows declaration order, so a `Proceed` for an
/// earlier step of the current round compares as stale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    /// Waiting to start a new round
    #[default]
    NewNumber,
    /// Proposer builds and broadcasts a block
    Propose,
    /// Validators vote for the proposal
    Prevote,
    /// Validators commit to the proposal once prevotes reached quorum
    Precommit,
    /// Block has been appended to the chain
    Commit,
}

impl Step {
    /// Returns true if this step can transition to the target step
    #[must_use]
    pub fn can_transition_to(&self, target: Step) -> bool {
        matches!(
            (self, target),
            (Step::NewNumber, Step::Propose)
                | (Step::Propose, Step::Prevote)
                | (Step::Prevote, Step::Precommit)
                | (Step::Precommit, Step::Commit)
                | (Step::Commit, Step::NewNumber)
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::NewNumber => "NEW_NUMBER",
            Step::Propose => "PROPOSE",
            Step::Prevote => "PREVOTE",
            Step::Precommit => "PRECOMMIT",
            Step::Commit => "COMMIT",
        };
        f.write_str(name)
    }
}

/// Kind of a consensus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    /// Block proposal
    Proposal,
    /// First-stage vote
    Prevote,
    /// Second-stage vote
    Precommit,
}

/// Typed view of a consensus transaction.
///
/// Consensus transactions carry the unordered nonce and write only under
/// `/consensus`. A proposal is a `SET` of exactly three writes: the
/// proposal itself, the next round's validator set and the next round's
/// proposer. A vote is a single `SET_VALUE` of the voter's stake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusTx {
    /// Block proposal for `number`
    Proposal {
        /// Round number
        number: u64,
        /// Hash of the proposed block
        block_hash: H256,
        /// Validator set published for `number + 1`
        next_validators: ValidatorSet,
        /// Proposer published for `number + 1`
        next_proposer: Address,
    },
    /// Prevote for `number`
    Prevote {
        /// Round number
        number: u64,
        /// Voting validator
        voter: Address,
        /// Stake the voter claims
        stake: u64,
    },
    /// Precommit for `number`
    Precommit {
        /// Round number
        number: u64,
        /// Voting validator
        voter: Address,
        /// Stake the voter claims
        stake: u64,
    },
}

impl ConsensusTx {
    /// Interprets `tx` as a consensus transaction.
    pub fn parse(tx: &Transaction) -> ConsensusResult<Self> {
        if tx.nonce != UNORDERED_NONCE {
            return Err(invalid("consensus transactions must be unordered"));
        }
        match &tx.operation {
            Operation::SetValue { path, value } => {
                let stake = value
                    .as_u64()
                    .ok_or_else(|| invalid("vote value is not a stake"))?;
                let parsed = match ConsensusPath::parse(path) {
                    Some(ConsensusPath::Prevote(number, voter)) => ConsensusTx::Prevote {
                        number,
                        voter,
                        stake,
                    },
                    Some(ConsensusPath::Precommit(number, voter)) => ConsensusTx::Precommit {
                        number,
                        voter,
                        stake,
                    },
                    _ => return Err(invalid("vote path is not a prevote or precommit")),
                };
                if parsed.voter() != Some(tx.address) {
                    return Err(invalid("vote signer does not match voter"));
                }
                Ok(parsed)
            }
            Operation::Set { op_list } if op_list.len() == 3 => parse_proposal(op_list),
            Operation::Set { .. } => Err(invalid("proposal must hold exactly three operations")),
        }
    }

    /// Round the transaction belongs to.
    pub fn number(&self) -> u64 {
        match self {
            ConsensusTx::Proposal { number, .. }
            | ConsensusTx::Prevote { number, .. }
            | ConsensusTx::Precommit { number, .. } => *number,
        }
    }

    /// Kind of the transaction.
    pub fn kind(&self) -> VoteKind {
        match self {
            ConsensusTx::Proposal { .. } => VoteKind::Proposal,
            ConsensusTx::Prevote { .. } => VoteKind::Prevote,
            ConsensusTx::Precommit { .. } => VoteKind::Precommit,
        }
    }

    /// Voter of a prevote or precommit.
    pub fn voter(&self) -> Option<Address> {
        match self {
            ConsensusTx::Proposal { .. } => None,
            ConsensusTx::Prevote { voter, .. } | ConsensusTx::Precommit { voter, .. } => {
                Some(*voter)
            }
        }
    }
}

fn parse_proposal(op_list: &[Operation]) -> ConsensusResult<ConsensusTx> {
    let mut number = None;
    let mut block_hash = None;
    let mut next_validators = None;
    let mut next_proposer = None;

    for op in op_list {
        let Operation::SetValue { path, value } = op else {
            return Err(invalid("nested SET inside a proposal"));
        };
        let reserved =
            ConsensusPath::parse(path).ok_or_else(|| invalid("proposal writes outside /consensus"))?;
        let n = reserved
            .number()
            .ok_or_else(|| invalid("proposal path without a round"))?;
        if *number.get_or_insert(n) != n {
            return Err(invalid("proposal writes span several rounds"));
        }
        match reserved {
            ConsensusPath::Propose(_) => {
                let hash = value
                    .get("block_hash")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| invalid("proposal without block_hash"))?;
                block_hash = Some(H256::from_hex(hash).map_err(|_| invalid("bad block_hash"))?);
            }
            ConsensusPath::NextRoundValidators(_) => {
                next_validators = Some(
                    serde_json::from_value(value.clone())
                        .map_err(|_| invalid("bad next_round_validators"))?,
                );
            }
            ConsensusPath::NextRoundProposer(_) => {
                let addr = value
                    .as_str()
                    .and_then(|s| s.parse::<Address>().ok())
                    .ok_or_else(|| invalid("bad next_round_proposer"))?;
                next_proposer = Some(addr);
            }
            _ => return Err(invalid("unexpected path in proposal")),
        }
    }

    match (number, block_hash, next_validators, next_proposer) {
        (Some(number), Some(block_hash), Some(next_validators), Some(next_proposer)) => {
            Ok(ConsensusTx::Proposal {
                number,
                block_hash,
                next_validators,
                next_proposer,
            })
        }
        _ => Err(invalid("proposal is missing a required write")),
    }
}

fn invalid(reason: &str) -> ConsensusError {
    ConsensusError::InvalidTransaction(reason.to_string())
}

/// Signs a proposal transaction for `block`.
pub fn proposal_transaction(
    keypair: &Keypair,
    block: &Block,
    next_validators: &ValidatorSet,
    next_proposer: Address,
) -> ConsensusResult<Transaction> {
    let number = block.number();
    let validators = serde_json::to_value(next_validators)
        .map_err(|e| ConsensusError::InvalidTransaction(e.to_string()))?;
    let operation = Operation::Set {
        op_list: vec![
            Operation::set_value(
                ConsensusPath::Propose(number).to_string(),
                serde_json::json!({
                    "number": number,
                    "block_hash": block.hash.to_hex(),
                    "proposer": keypair.address().to_string(),
                }),
            ),
            Operation::set_value(
                ConsensusPath::NextRoundValidators(number).to_string(),
                validators,
            ),
            Operation::set_value(
                ConsensusPath::NextRoundProposer(number).to_string(),
                next_proposer.to_string().into(),
            ),
        ],
    };
    Ok(Transaction::sign(keypair, UNORDERED_NONCE, now_millis(), operation)?)
}

/// Signs a prevote or precommit of `stake` for round `number`.
pub fn vote_transaction(
    keypair: &Keypair,
    kind: VoteKind,
    number: u64,
    stake: u64,
) -> ConsensusResult<Transaction> {
    let voter = keypair.address();
    let path = match kind {
        VoteKind::Prevote => ConsensusPath::Prevote(number, voter),
        VoteKind::Precommit => ConsensusPath::Precommit(number, voter),
        VoteKind::Proposal => {
            return Err(ConsensusError::InvalidTransaction(
                "proposals are built with proposal_transaction".into(),
            ))
        }
    };
    let operation = Operation::set_value(path.to_string(), stake.into());
    Ok(Transaction::sign(keypair, UNORDERED_NONCE, now_millis(), operation)?)
}

/// A consensus transaction as kept in the vote ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Kind of the transaction
    pub kind: VoteKind,
    /// The signed transaction
    pub tx: Transaction,
    /// Proposed block, carried by proposals only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
}

/// Exportable view of a node's consensus state.
///
/// Sent to lagging peers alongside chain subsections so they can replay the
/// votes of the rounds they missed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    /// Round the node is working on
    pub number: u64,
    /// Step within the round
    pub step: Step,
    /// Vote ledger keyed by round
    #[serde(with = "rounds")]
    pub votes: BTreeMap<u64, Vec<VoteRecord>>,
}

/// Encodes the ledger as a list of rounds. Integer map keys do not survive
/// the buffering serde does for tagged message bodies.
mod rounds {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::VoteRecord;

    #[derive(Serialize, Deserialize)]
    struct Round {
        number: u64,
        votes: Vec<VoteRecord>,
    }

    pub(super) fn serialize<S>(
        value: &BTreeMap<u64, Vec<VoteRecord>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(value.iter().map(|(number, votes)| Round {
            number: *number,
            votes: votes.clone(),
        }))
    }

    pub(super) fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<u64, Vec<VoteRecord>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let rounds = Vec::<Round>::deserialize(deserializer)?;
        Ok(rounds.into_iter().map(|r| (r.number, r.votes)).collect())
    }
}
