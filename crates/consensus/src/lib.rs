//! # stakebft consensus
//!
//! Stake-weighted BFT consensus engine.
//!
//! Each round decides one block. Validators vote by writing their stake to
//! reserved paths of the shared state tree; the state store sums the stake
//! per round, and a step completes once the sum reaches two thirds of the
//! round's total stake. Votes are ordinary signed transactions, so the
//! votes that finalized a block travel inside the next block as its
//! `last_votes`.
//!
//! ## Consensus Flow
//!
//! ```text
//! Round n:
//!
//! ┌──────────────┐
//! │  NEW_NUMBER  │  n = chain height + 1
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   PROPOSE    │  proposer = stored proposer(n), else stake-weighted draw
//! │              │  broadcast SET{propose, next_round_validators,
//! │              │               next_round_proposer} + block
//! └──────┬───────┘
//!        │ proposal accepted
//!        ▼
//! ┌──────────────┐
//! │   PREVOTE    │  write own stake to prevote/{addr}
//! └──────┬───────┘
//!        │ prevote_sum >= total_at_stake * 2 / 3
//!        ▼
//! ┌──────────────┐
//! │  PRECOMMIT   │  write own stake to precommit/{addr}
//! └──────┬───────┘
//!        │ precommit_sum >= total_at_stake * 2 / 3
//!        ▼
//! ┌──────────────┐
//! │   COMMIT     │  append block, finalize state, replay later votes
//! └──────────────┘
//! ```
//!
//! There are no round timeouts. A round that does not move for a while
//! triggers a resync: the node rebroadcasts its own votes and asks peers
//! for blocks it may have missed.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod engine;
pub mod message;
pub mod proposer;
pub mod queue;
pub mod state_machine;
pub mod timeout;
pub mod types;
pub mod vote_set;

pub use engine::{
    ConsensusEngine, ConsensusError, ConsensusNetwork, ConsensusResult, ConsensusState,
    EngineConfig,
};
pub use message::{MessageBody, NetworkMessage, PROTOCOL_VERSION};
pub use proposer::{seed_number, select_proposer, ProposerError, ProposerResult};
pub use queue::{ConsensusQueue, QueuedMessage};
pub use state_machine::{transition, Action, Event, StateMachineError, Transition};
pub use timeout::StallMonitor;
pub use types::{
    proposal_transaction, vote_transaction, ConsensusSnapshot, ConsensusTx, Step, VoteKind,
    VoteRecord,
};
pub use vote_set::{quorum, VoteLedger};
