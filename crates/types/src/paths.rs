//! Reserved state paths.
//!
//! Consensus bookkeeping lives in the shared state tree under `/consensus`.
//! Writes to these paths trigger built-in behaviour in the state store and
//! mark a transaction as a vote. [`ConsensusPath::parse`] turns a path string
//! into a typed variant once so callers match on structure instead of
//! re-parsing strings.

use crate::Address;
use std::fmt;

/// Root of all consensus bookkeeping.
pub const CONSENSUS_ROOT: &str = "/consensus";

/// Staking table consulted when publishing the next round's validator set.
pub const STAKING_VALIDATORS: &str = "/staking/validators";

/// A parsed reserved path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsensusPath {
    /// `/consensus/latest_number`
    LatestNumber,
    /// `/consensus/number/{n}/propose`
    Propose(u64),
    /// `/consensus/number/{n}/validators`
    Validators(u64),
    /// `/consensus/number/{n}/next_round_validators`
    NextRoundValidators(u64),
    /// `/consensus/number/{n}/proposer`
    Proposer(u64),
    /// `/consensus/number/{n}/next_round_proposer`
    NextRoundProposer(u64),
    /// `/consensus/number/{n}/total_at_stake`
    TotalAtStake(u64),
    /// `/consensus/number/{n}/prevote/{addr}`
    Prevote(u64, Address),
    /// `/consensus/number/{n}/precommit/{addr}`
    Precommit(u64, Address),
    /// `/consensus/number/{n}/prevote_sum`
    PrevoteSum(u64),
    /// `/consensus/number/{n}/precommit_sum`
    PrecommitSum(u64),
}

impl ConsensusPath {
    /// Parses a path. Returns `None` for anything outside the reserved shapes.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(CONSENSUS_ROOT)?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            ["latest_number"] => Some(Self::LatestNumber),
            ["number", n, leaf] => {
                let n = n.parse().ok()?;
                match *leaf {
                    "propose" => Some(Self::Propose(n)),
                    "validators" => Some(Self::Validators(n)),
                    "next_round_validators" => Some(Self::NextRoundValidators(n)),
                    "proposer" => Some(Self::Proposer(n)),
                    "next_round_proposer" => Some(Self::NextRoundProposer(n)),
                    "total_at_stake" => Some(Self::TotalAtStake(n)),
                    "prevote_sum" => Some(Self::PrevoteSum(n)),
                    "precommit_sum" => Some(Self::PrecommitSum(n)),
                    _ => None,
                }
            }
            ["number", n, kind, addr] => {
                let n = n.parse().ok()?;
                let addr = addr.parse().ok()?;
                match *kind {
                    "prevote" => Some(Self::Prevote(n, addr)),
                    "precommit" => Some(Self::Precommit(n, addr)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Round number the path belongs to, if any.
    pub fn number(&self) -> Option<u64> {
        match *self {
            Self::LatestNumber => None,
            Self::Propose(n)
            | Self::Validators(n)
            | Self::NextRoundValidators(n)
            | Self::Proposer(n)
            | Self::NextRoundProposer(n)
            | Self::TotalAtStake(n)
            | Self::Prevote(n, _)
            | Self::Precommit(n, _)
            | Self::PrevoteSum(n)
            | Self::PrecommitSum(n) => Some(n),
        }
    }
}

impl fmt::Display for ConsensusPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LatestNumber => write!(f, "{CONSENSUS_ROOT}/latest_number"),
            Self::Propose(n) => write!(f, "{CONSENSUS_ROOT}/number/{n}/propose"),
            Self::Validators(n) => write!(f, "{CONSENSUS_ROOT}/number/{n}/validators"),
            Self::NextRoundValidators(n) => {
                write!(f, "{CONSENSUS_ROOT}/number/{n}/next_round_validators")
            }
            Self::Proposer(n) => write!(f, "{CONSENSUS_ROOT}/number/{n}/proposer"),
            Self::NextRoundProposer(n) => {
                write!(f, "{CONSENSUS_ROOT}/number/{n}/next_round_proposer")
            }
            Self::TotalAtStake(n) => write!(f, "{CONSENSUS_ROOT}/number/{n}/total_at_stake"),
            Self::Prevote(n, a) => write!(f, "{CONSENSUS_ROOT}/number/{n}/prevote/{a}"),
            Self::Precommit(n, a) => write!(f, "{CONSENSUS_ROOT}/number/{n}/precommit/{a}"),
            Self::PrevoteSum(n) => write!(f, "{CONSENSUS_ROOT}/number/{n}/prevote_sum"),
            Self::PrecommitSum(n) => write!(f, "{CONSENSUS_ROOT}/number/{n}/precommit_sum"),
        }
    }
}

/// Splits a slash-separated path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
