//! Consensus engine.
//!
//! [`ConsensusEngine`] drives one round at a time through the step table in
//! [`crate::state_machine`]. It owns the round state and the vote ledger and
//! shares the chain, the state tree and the transaction orderer with the
//! rest of the node. All mutation happens on the thread that calls
//! [`ConsensusEngine::tick`]; other threads only push work onto the
//! [`ConsensusQueue`].
//!
//! Lock order is chain, then state tree, then orderer. No path holds a
//! later lock while acquiring an earlier one.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use stakebft_mempool::TransactionOrderer;
use stakebft_storage::{ChainStore, StateStore, StorageError};
use stakebft_types::paths::STAKING_VALIDATORS;
use stakebft_types::{Address, Block, ConsensusPath, Keypair, Transaction, ValidatorSet, H256};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::proposer::{seed_number, select_proposer, ProposerError};
use crate::queue::{ConsensusQueue, QueuedMessage};
use crate::state_machine::{transition, Action, Event, StateMachineError};
use crate::timeout::StallMonitor;
use crate::types::{
    proposal_transaction, vote_transaction, ConsensusSnapshot, ConsensusTx, Step, VoteKind,
    VoteRecord,
};
use crate::vote_set::{quorum, VoteLedger};

/// Errors produced by the consensus engine
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Malformed consensus transaction
    #[error("invalid consensus transaction: {0}")]
    InvalidTransaction(String),

    /// Proposal failed validation
    #[error("invalid proposal for {number}: {reason}")]
    InvalidProposal {
        /// Round number
        number: u64,
        /// Why it was rejected
        reason: String,
    },

    /// A different proposal is already accepted for the round
    #[error("conflicting proposal for {number}")]
    ConflictingProposal {
        /// Round number
        number: u64,
    },

    /// A block the engine needs is not available
    #[error("block {0} is not available")]
    MissingBlock(u64),

    /// The local round is ahead of the chain with nothing to rebuild from
    #[error("cannot catch up: round {number} is ahead of chain height {last}")]
    CatchUpImpossible {
        /// Local round
        number: u64,
        /// Chain height
        last: u64,
    },

    /// Invalid engine configuration
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    /// Core type error
    #[error("type error: {0}")]
    Types(#[from] stakebft_types::Error),

    /// State store rejected a write
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Proposer selection failed
    #[error("proposer selection failed: {0}")]
    Proposer(#[from] ProposerError),

    /// No transition for the observed event
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Outbound side of the network, as seen by the engine.
pub trait ConsensusNetwork: Send + Sync {
    /// Sends a consensus transaction, and the block for proposals, to all peers.
    fn broadcast_consensus(&self, tx: &Transaction, block: Option<&Block>);

    /// Asks peers for the blocks following `last_block`.
    fn request_chain_subsection(&self, last_block: &Block);
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Interval between ticks in milliseconds
    pub tick_interval_ms: u64,
    /// How many blocks back the proposer seed is taken from
    pub seed_lookback: u64,
    /// Unchanged ticks before the engine resynchronizes; zero disables
    pub stall_ticks: u32,
    /// How many rounds ahead of the current one messages are stashed
    pub max_future_rounds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            seed_lookback: 5,
            stall_ticks: 30,
            max_future_rounds: 5,
        }
    }
}

impl EngineConfig {
    /// Checks that the values can drive a round.
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "tick_interval_ms must be positive".into(),
            ));
        }
        // The proposer of n + 1 is drawn while n is open, so its seed block
        // must already be committed.
        if self.seed_lookback < 2 {
            return Err(ConsensusError::InvalidConfig(
                "seed_lookback must be at least 2".into(),
            ));
        }
        if self.max_future_rounds == 0 {
            return Err(ConsensusError::InvalidConfig(
                "max_future_rounds must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Round state of the engine.
#[derive(Debug, Clone, Default)]
pub struct ConsensusState {
    /// Round being decided
    pub number: u64,
    /// Step within the round
    pub step: Step,
    /// Accepted proposal for the round
    pub proposed_block: Option<Block>,
    /// Consensus transactions by round
    pub votes: VoteLedger,
}

impl ConsensusState {
    /// State at the start of round `number`.
    pub fn new(number: u64) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    /// Moves to round `number`, keeping the vote ledger.
    pub fn reset_for_number(&mut self, number: u64) {
        self.number = number;
        self.step = Step::NewNumber;
        self.proposed_block = None;
    }
}

/// Stake-weighted BFT engine over a [`StateStore`] and a [`ConsensusNetwork`].
pub struct ConsensusEngine<S: StateStore, N: ConsensusNetwork> {
    config: EngineConfig,
    keypair: Keypair,
    address: Address,
    chain: Arc<RwLock<ChainStore>>,
    db: Arc<RwLock<S>>,
    orderer: Arc<Mutex<TransactionOrderer>>,
    network: N,
    queue: ConsensusQueue,
    state: ConsensusState,
    stall: StallMonitor,
    /// Highest future round a chain subsection was requested for
    sync_requested_for: u64,
}

impl<S: StateStore, N: ConsensusNetwork> ConsensusEngine<S, N> {
    /// Creates an engine. Call [`ConsensusEngine::init`] before ticking.
    pub fn new(
        config: EngineConfig,
        keypair: Keypair,
        chain: Arc<RwLock<ChainStore>>,
        db: Arc<RwLock<S>>,
        orderer: Arc<Mutex<TransactionOrderer>>,
        network: N,
    ) -> ConsensusResult<Self> {
        config.validate()?;
        let address = keypair.address();
        let stall = StallMonitor::new(config.stall_ticks);
        Ok(Self {
            config,
            keypair,
            address,
            chain,
            db,
            orderer,
            network,
            queue: ConsensusQueue::new(),
            state: ConsensusState::default(),
            stall,
            sync_requested_for: 0,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Address votes are cast from.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Current round state.
    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    /// Handle for pushing work to the engine.
    pub fn queue(&self) -> ConsensusQueue {
        self.queue.clone()
    }

    /// Outbound network handle.
    pub fn network(&self) -> &N {
        &self.network
    }

    /// Starts the round after the chain tip.
    pub fn init(&mut self) {
        let last = self.chain.read().last_number();
        self.state.reset_for_number(last + 1);
        self.state.votes.cleanup_votes(last);
        info!(number = last + 1, address = %self.address, "consensus initialized");
    }

    /// Processes one queued message, or proceeds with the round when the
    /// queue is empty.
    pub fn tick(&mut self) {
        let message = self.queue.pop().unwrap_or(QueuedMessage::Proceed {
            number: self.state.number,
            step: self.state.step,
        });
        match message {
            QueuedMessage::Proceed { number, step } => {
                if (number, step) < (self.state.number, self.state.step) {
                    trace!(number, %step, "dropping stale proceed");
                } else {
                    let event = self.observe();
                    self.run(event);
                }
            }
            QueuedMessage::HandleVote { tx, block } => {
                let hash = tx.hash;
                if let Err(e) = self.handle_consensus_transaction(tx, block) {
                    debug!(tx = %hash, error = %e, "dropped consensus transaction");
                }
            }
        }
        if self.stall.observe(self.state.number, self.state.step) {
            self.run(Event::Stalled);
        }
    }

    fn observe(&self) -> Event {
        let number = self.state.number;
        match self.state.step {
            Step::NewNumber | Step::Commit => Event::Proceed,
            Step::Propose if self.state.proposed_block.is_some() => Event::ProposalReady,
            Step::Propose => Event::ProposalMissing,
            Step::Prevote if self.has_quorum(ConsensusPath::PrevoteSum(number)) => {
                Event::PrevoteQuorum
            }
            Step::Precommit if self.has_quorum(ConsensusPath::PrecommitSum(number)) => {
                Event::PrecommitQuorum
            }
            Step::Prevote | Step::Precommit => Event::QuorumPending,
        }
    }

    fn run(&mut self, event: Event) {
        let from = self.state.step;
        let t = match transition(from, event) {
            Ok(t) => t,
            Err(e) => {
                warn!(number = self.state.number, error = %e, "ignoring event");
                return;
            }
        };
        let done = match t.action {
            Action::EnterPropose => self.enter_propose(),
            Action::Propose => {
                self.propose_if_due();
                true
            }
            Action::Prevote => {
                self.cast_vote(VoteKind::Prevote);
                true
            }
            Action::Precommit => {
                self.cast_vote(VoteKind::Precommit);
                true
            }
            Action::Commit => self.commit(),
            Action::NewNumber => {
                let number = self.chain.read().last_number() + 1;
                self.state.reset_for_number(number);
                debug!(number, "new round");
                true
            }
            Action::Wait => true,
            Action::Resync => {
                self.resync();
                true
            }
        };
        if done && t.advances(from) {
            debug!(number = self.state.number, %from, to = %t.next, "step");
            self.state.step = t.next;
        }
    }

    fn enter_propose(&mut self) -> bool {
        let number = self.chain.read().last_number() + 1;
        if number != self.state.number {
            self.state.reset_for_number(number);
        }
        self.adopt_stashed_proposal(number);
        self.propose_if_due();
        true
    }

    fn propose_if_due(&mut self) {
        let number = self.state.number;
        if self.state.proposed_block.is_some() || !self.is_proposer(number) {
            return;
        }
        match self.create_proposal() {
            Ok(Some((tx, block))) => self.accept_own_proposal(tx, block),
            Ok(None) => debug!(number, "no proposal created"),
            Err(e) => warn!(number, error = %e, "failed to create proposal"),
        }
    }

    /// Whether this node proposes round `number`.
    pub fn is_proposer(&self, number: u64) -> bool {
        self.proposer_for(number) == Some(self.address)
    }

    /// Proposer of round `number`: the one recorded in state, else the
    /// stake-weighted draw over the round's validators.
    pub fn proposer_for(&self, number: u64) -> Option<Address> {
        let validators = {
            let db = self.db.read();
            if let Some(proposer) = db.stored_proposer(number) {
                return Some(proposer);
            }
            db.validators(number)?
        };
        let seed = self
            .chain
            .read()
            .block_at(seed_number(number, self.config.seed_lookback))?
            .hash;
        select_proposer(&validators, &seed).ok()
    }

    fn create_proposal(&self) -> ConsensusResult<Option<(Transaction, Block)>> {
        let number = self.state.number;
        let (last, candidate) = {
            let chain = self.chain.read();
            (chain.last_block().clone(), chain.candidate(number).cloned())
        };
        if last.number() + 1 != number {
            return Ok(None);
        }

        let reusable = candidate
            .filter(|c| c.header.proposer == self.address && c.last_hash() == last.hash);
        let block = match reusable {
            Some(block) => block,
            None => match self.build_block(&last, number) {
                Some(block) => block,
                None => return Ok(None),
            },
        };

        let next_validators = self.next_round_validators(number);
        let seed_at = seed_number(number + 1, self.config.seed_lookback);
        let seed = self
            .chain
            .read()
            .block_at(seed_at)
            .ok_or(ConsensusError::MissingBlock(seed_at))?
            .hash;
        let next_proposer = select_proposer(&next_validators, &seed)?;
        let tx = proposal_transaction(&self.keypair, &block, &next_validators, next_proposer)?;
        Ok(Some((tx, block)))
    }

    fn build_block(&self, last: &Block, number: u64) -> Option<Block> {
        let validators = self.db.read().validators(number).unwrap_or_default();
        let last_votes = self.state.votes.transactions(number - 1);
        let transactions = self.orderer.lock().ordered_batch();

        let block = Block::create(
            last.hash,
            last_votes.clone(),
            transactions,
            number,
            self.address,
            validators.clone(),
        );
        if self.db.read().verify_block_on_snapshot(&block).is_some() {
            return Some(block);
        }
        warn!(number, "pending transactions fail on snapshot, proposing without them");
        let block = Block::create(last.hash, last_votes, vec![], number, self.address, validators);
        self.db
            .read()
            .verify_block_on_snapshot(&block)
            .map(|_| block)
    }

    /// Staking table with positive stakes, falling back to the round's set.
    fn next_round_validators(&self, number: u64) -> ValidatorSet {
        let db = self.db.read();
        let staked: ValidatorSet = db
            .get_value(STAKING_VALIDATORS)
            .and_then(|v| serde_json::from_value::<ValidatorSet>(v).ok())
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, stake)| *stake > 0)
            .collect();
        if staked.is_empty() {
            return db.validators(number).unwrap_or_default();
        }
        staked
    }

    fn accept_own_proposal(&mut self, tx: Transaction, block: Block) {
        let number = block.number();
        if let Err(e) = self.db.write().execute_transaction(&tx) {
            warn!(number, error = %e, "own proposal rejected by state");
            return;
        }
        self.chain.write().record_candidate(block.clone());
        self.state.votes.add_vote(
            number,
            VoteRecord {
                kind: VoteKind::Proposal,
                tx: tx.clone(),
                block: Some(block.clone()),
            },
        );
        info!(
            number,
            hash = %block.hash,
            txs = block.transactions.len(),
            last_votes = block.last_votes.len(),
            "proposed block"
        );
        self.network.broadcast_consensus(&tx, Some(&block));
        self.state.proposed_block = Some(block);
    }

    fn cast_vote(&mut self, kind: VoteKind) {
        let number = self.state.number;
        if self.state.proposed_block.is_none()
            || self.state.votes.has_voted(number, kind, &self.address)
        {
            return;
        }
        let stake = self
            .db
            .read()
            .validators(number)
            .and_then(|set| set.get(&self.address).copied())
            .unwrap_or(0);
        if stake == 0 {
            trace!(number, ?kind, "not a validator of the round");
            return;
        }
        let tx = match vote_transaction(&self.keypair, kind, number, stake) {
            Ok(tx) => tx,
            Err(e) => {
                error!(number, error = %e, "failed to sign vote");
                return;
            }
        };
        if let Err(e) = self.db.write().execute_transaction(&tx) {
            warn!(number, ?kind, error = %e, "own vote rejected by state");
            return;
        }
        self.state.votes.add_vote(
            number,
            VoteRecord {
                kind,
                tx: tx.clone(),
                block: None,
            },
        );
        debug!(number, ?kind, stake, "cast vote");
        self.network.broadcast_consensus(&tx, None);
    }

    fn has_quorum(&self, sum: ConsensusPath) -> bool {
        let db = self.db.read();
        let total = db.get_u64(&ConsensusPath::TotalAtStake(self.state.number).to_string());
        let tallied = db.get_u64(&sum.to_string());
        match (tallied, total) {
            (Some(tallied), Some(total)) if tallied > 0 && total > 0 => quorum(tallied, total),
            _ => false,
        }
    }

    fn commit(&mut self) -> bool {
        let Some(block) = self.state.proposed_block.clone() else {
            return false;
        };
        let number = block.number();
        let snapshot = {
            let mut chain = self.chain.write();
            if !block.validate_proposed_block(chain.last_number()) {
                error!(number, "proposal no longer extends the chain");
                return false;
            }
            let Some(snapshot) = self.db.read().verify_block_on_snapshot(&block) else {
                error!(number, "proposal fails on the finalized state");
                return false;
            };
            if !chain.append(block.clone()) {
                error!(number, "chain refused the proposal");
                return false;
            }
            chain.evict_candidates_through(number);
            snapshot
        };

        self.orderer.lock().cleanup_for_block(&block);
        {
            let mut db = self.db.write();
            db.finalize(snapshot.clone());
            db.set_db_to_snapshot(snapshot);
        }
        self.state.votes.cleanup_votes(number);
        self.apply_votes_at_or_above(number);
        self.reapply_pending();

        info!(
            number,
            hash = %block.hash,
            txs = block.transactions.len(),
            "committed block"
        );
        true
    }

    /// Replays the ledger from round `number` upward onto the state tree.
    /// Records that fail where they can already be judged are dropped.
    fn apply_votes_at_or_above(&mut self, number: u64) {
        let mut failed = Vec::new();
        {
            let mut db = self.db.write();
            for (n, records) in self.state.votes.rounds_from(number) {
                for record in records {
                    if let Err(e) = db.execute_transaction(&record.tx) {
                        trace!(number = n, tx = %record.tx.hash, error = %e, "vote replay failed");
                        if n <= number + 1 {
                            failed.push((n, record.tx.hash));
                        }
                    }
                }
            }
        }
        for (n, hash) in failed {
            self.state.votes.remove(n, &hash);
        }
    }

    fn reapply_pending(&self) {
        let batch = self.orderer.lock().ordered_batch();
        let mut db = self.db.write();
        for tx in &batch {
            if let Err(e) = db.execute_transaction(tx) {
                trace!(tx = %tx.hash, error = %e, "pending transaction no longer applies");
            }
        }
    }

    /// Validates and records a consensus transaction received from a peer.
    pub fn handle_consensus_transaction(
        &mut self,
        tx: Transaction,
        block: Option<Block>,
    ) -> ConsensusResult<()> {
        tx.verify()?;
        let parsed = ConsensusTx::parse(&tx)?;
        let number = parsed.number();
        let kind = parsed.kind();
        if self.state.votes.contains(number, &tx.hash) {
            trace!(number, tx = %tx.hash, "already recorded");
            return Ok(());
        }
        match parsed {
            ConsensusTx::Proposal { block_hash, .. } => {
                self.handle_proposal(tx, number, block_hash, block)
            }
            ConsensusTx::Prevote { .. } | ConsensusTx::Precommit { .. } => {
                self.handle_vote(tx, kind, number)
            }
        }
    }

    fn handle_vote(&mut self, tx: Transaction, kind: VoteKind, number: u64) -> ConsensusResult<()> {
        let current = self.state.number;
        if number < current.saturating_sub(1) {
            trace!(number, current, "stale vote");
            return Ok(());
        }
        let record = VoteRecord {
            kind,
            tx: tx.clone(),
            block: None,
        };
        if number > current {
            if !self.may_stash(number, &tx.address, kind) {
                return Ok(());
            }
            self.state.votes.add_vote(number, record);
            debug!(number, current, ?kind, "stashed future vote");
            self.note_future_round(number);
            return Ok(());
        }

        self.db.write().execute_transaction(&tx)?;
        self.state.votes.add_vote(number, record);
        trace!(number, ?kind, voter = %tx.address, "recorded vote");
        self.network.broadcast_consensus(&tx, None);
        self.queue.push_proceed(current, self.state.step);
        Ok(())
    }

    fn handle_proposal(
        &mut self,
        tx: Transaction,
        number: u64,
        block_hash: H256,
        block: Option<Block>,
    ) -> ConsensusResult<()> {
        let current = self.state.number;
        if number < current.saturating_sub(1) {
            trace!(number, current, "stale proposal");
            return Ok(());
        }

        if number.checked_add(1) == Some(current) {
            // The round is committed; keep its proposal for the next block's
            // last votes if none was recorded.
            if self.state.votes.proposals(number).next().is_some() {
                return Ok(());
            }
            if block_hash != self.chain.read().last_hash() {
                debug!(number, "late proposal does not match the committed block");
                return Ok(());
            }
            self.db.write().execute_transaction(&tx)?;
            self.state.votes.add_vote(
                number,
                VoteRecord {
                    kind: VoteKind::Proposal,
                    tx,
                    block: None,
                },
            );
            return Ok(());
        }

        let Some(block) = block.filter(|b| b.hash == block_hash) else {
            return Err(ConsensusError::InvalidProposal {
                number,
                reason: "block missing or does not match block_hash".into(),
            });
        };

        if number > current {
            if !self.may_stash(number, &tx.address, VoteKind::Proposal) {
                return Ok(());
            }
            self.chain.write().record_candidate(block.clone());
            self.state.votes.add_vote(
                number,
                VoteRecord {
                    kind: VoteKind::Proposal,
                    tx,
                    block: Some(block),
                },
            );
            debug!(number, current, "stashed future proposal");
            self.note_future_round(number);
            return Ok(());
        }

        if let Some(accepted) = &self.state.proposed_block {
            if accepted.hash != block.hash {
                warn!(
                    number,
                    accepted = %accepted.hash,
                    received = %block.hash,
                    proposer = %tx.address,
                    "conflicting proposal"
                );
                return Err(ConsensusError::ConflictingProposal { number });
            }
            return Ok(());
        }

        self.accept_proposal(&tx, &block)?;
        self.state.votes.add_vote(
            number,
            VoteRecord {
                kind: VoteKind::Proposal,
                tx: tx.clone(),
                block: Some(block.clone()),
            },
        );
        self.network.broadcast_consensus(&tx, Some(&block));
        self.queue.push_proceed(current, self.state.step);
        Ok(())
    }

    /// Whether a message for future round `number` from `signer` may be
    /// kept until the round opens. Rounds past the stash horizon are
    /// dropped, as are signers the state already rules out for the round.
    fn may_stash(&self, number: u64, signer: &Address, kind: VoteKind) -> bool {
        let horizon = self.state.number.saturating_add(self.config.max_future_rounds);
        if number > horizon {
            debug!(number, horizon, ?kind, "dropping message beyond the stash horizon");
            return false;
        }
        let db = self.db.read();
        let allowed = match kind {
            VoteKind::Proposal => db.stored_proposer(number).map_or(true, |p| p == *signer),
            VoteKind::Prevote | VoteKind::Precommit => db
                .validators(number)
                .map_or(true, |set| set.get(signer).is_some_and(|stake| *stake > 0)),
        };
        if !allowed {
            debug!(number, signer = %signer, ?kind, "dropping future message from outside the round");
        }
        allowed
    }

    /// Requests blocks when a message shows the network more than one round
    /// ahead, once per newly seen round.
    fn note_future_round(&mut self, number: u64) {
        if number > self.state.number.saturating_add(1) && number > self.sync_requested_for {
            self.sync_requested_for = number;
            self.request_sync();
        }
    }

    fn accept_proposal(&mut self, tx: &Transaction, block: &Block) -> ConsensusResult<()> {
        let number = block.number();
        let reject = |reason: &str| ConsensusError::InvalidProposal {
            number,
            reason: reason.to_string(),
        };

        if self.proposer_for(number) != Some(tx.address) || block.header.proposer != tx.address {
            return Err(reject("signer is not the round's proposer"));
        }
        {
            let chain = self.chain.read();
            if block.last_hash() != chain.last_hash() {
                return Err(reject("does not extend the chain tip"));
            }
            if !block.validate_proposed_block(chain.last_number()) {
                return Err(reject("block failed validation"));
            }
        }
        if self.db.read().verify_block_on_snapshot(block).is_none() {
            return Err(reject("block fails on the finalized state"));
        }
        self.db.write().execute_transaction(tx)?;
        self.chain.write().record_candidate(block.clone());

        info!(number, hash = %block.hash, proposer = %tx.address, "accepted proposal");
        self.state.proposed_block = Some(block.clone());
        Ok(())
    }

    /// Accepts the first valid proposal stashed for `number` and discards
    /// the invalid ones.
    fn adopt_stashed_proposal(&mut self, number: u64) {
        if self.state.proposed_block.is_some() {
            return;
        }
        let stashed: Vec<VoteRecord> = self.state.votes.proposals(number).cloned().collect();
        for record in stashed {
            let Some(block) = record.block.as_ref() else {
                continue;
            };
            match self.accept_proposal(&record.tx, block) {
                Ok(()) => {
                    self.network.broadcast_consensus(&record.tx, Some(block));
                    return;
                }
                Err(e) => {
                    debug!(number, tx = %record.tx.hash, error = %e, "discarding stashed proposal");
                    self.state.votes.remove(number, &record.tx.hash);
                }
            }
        }
    }

    fn resync(&mut self) {
        let number = self.state.number;
        let mut rebroadcast = 0;
        for record in self.state.votes.votes(number) {
            if record.tx.address == self.address {
                self.network
                    .broadcast_consensus(&record.tx, record.block.as_ref());
                rebroadcast += 1;
            }
        }
        info!(number, step = %self.state.step, rebroadcast, "round stalled, resynchronizing");
        self.request_sync();
    }

    fn request_sync(&self) {
        let last = self.chain.read().last_block().clone();
        self.network.request_chain_subsection(&last);
    }

    /// Appends the blocks of a peer's chain subsection, finalizing the state
    /// tree block by block. Returns the appended blocks.
    pub fn merge_chain_subsection(&mut self, section: Vec<Block>) -> Vec<Block> {
        let appended = {
            let mut chain = self.chain.write();
            let db = &self.db;
            chain.merge(section, |block| {
                let mut db = db.write();
                match db.verify_block_on_snapshot(block) {
                    Some(snapshot) => {
                        db.finalize(snapshot.clone());
                        db.set_db_to_snapshot(snapshot);
                        true
                    }
                    None => false,
                }
            })
        };
        let Some(tip) = appended.last().map(Block::number) else {
            return appended;
        };
        {
            let mut orderer = self.orderer.lock();
            for block in &appended {
                orderer.cleanup_for_block(block);
            }
        }
        self.chain.write().evict_candidates_through(tip);
        info!(count = appended.len(), tip, "merged chain subsection");
        appended
    }

    /// Re-aligns the round with the chain tip after blocks were merged, then
    /// replays the votes of the candidate block and of the peer's snapshot.
    pub fn catch_up(&mut self, peer: Option<&ConsensusSnapshot>) -> ConsensusResult<()> {
        let (last, candidate) = {
            let chain = self.chain.read();
            let last = chain.last_number();
            if self.state.number > last + 1
                && chain.candidate(self.state.number - 1).is_none()
            {
                return Err(ConsensusError::CatchUpImpossible {
                    number: self.state.number,
                    last,
                });
            }
            (last, chain.candidate(last + 1).cloned())
        };
        let number = last + 1;
        info!(from = self.state.number, to = number, "catching up");

        self.state.reset_for_number(number);
        self.state.votes.cleanup_votes(last);
        {
            let mut db = self.db.write();
            let finalized = db.finalized_snapshot();
            db.set_db_to_snapshot(finalized);
        }
        self.apply_votes_at_or_above(last);
        self.reapply_pending();

        match candidate {
            Some(candidate) => {
                for tx in candidate.last_votes {
                    let hash = tx.hash;
                    if let Err(e) = self.handle_consensus_transaction(tx, None) {
                        debug!(tx = %hash, error = %e, "candidate vote rejected");
                    }
                }
            }
            None => debug!(number, "no candidate block to take votes from"),
        }

        match peer {
            Some(peer) if peer.number >= number => {
                for records in peer.votes.range(last..).map(|(_, r)| r) {
                    for record in records {
                        let hash = record.tx.hash;
                        if let Err(e) =
                            self.handle_consensus_transaction(record.tx.clone(), record.block.clone())
                        {
                            debug!(tx = %hash, error = %e, "peer vote rejected");
                        }
                    }
                }
            }
            Some(peer) => debug!(peer = peer.number, number, "peer is behind, skipping its votes"),
            None => {}
        }
        Ok(())
    }

    /// Exportable view of the round state and vote ledger.
    pub fn snapshot(&self) -> ConsensusSnapshot {
        ConsensusSnapshot {
            number: self.state.number,
            step: self.state.step,
            votes: self.state.votes.export(),
        }
    }
}
