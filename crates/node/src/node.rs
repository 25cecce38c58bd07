//! # stakebft Node
//!
//! This module wires the chain, the state tree, the transaction orderer and
//! the consensus engine into one node.
//!
//! The `Node` struct is responsible for:
//! - Deriving genesis and opening the block store
//! - Replaying stored blocks into the state tree and nonce trackers
//! - Dispatching messages received from peers
//! - Ticking the consensus engine until shutdown

use anyhow::{bail, Context, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use stakebft_config::Config;
use stakebft_consensus::{
    ConsensusEngine, ConsensusQueue, ConsensusSnapshot, MessageBody, NetworkMessage,
};
use stakebft_mempool::TransactionOrderer;
use stakebft_storage::{ChainStore, MemoryStateStore, SectionResponse, StateStore};
use stakebft_types::paths::CONSENSUS_ROOT;
use stakebft_types::{Block, Transaction, H256};

use crate::network::{ChannelNetwork, Outbound};

/// Engine type run by the node.
pub type NodeEngine = ConsensusEngine<MemoryStateStore, ChannelNetwork>;

/// Node status representing the current state of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Node is starting up
    Starting,
    /// Node is ticking the consensus engine
    Running,
    /// Node has stopped
    Stopped,
}

/// Events emitted by the node for external monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Node status changed
    StatusChanged(NodeStatus),
    /// New block committed or merged
    BlockCommitted {
        /// Block height
        number: u64,
        /// Block hash
        hash: H256,
    },
    /// A peer reported a longer chain
    SyncProgress {
        /// Local height
        current: u64,
        /// Peer height
        target: u64,
    },
}

/// Full node
pub struct Node {
    config: Arc<Config>,
    status: Arc<RwLock<NodeStatus>>,
    chain: Arc<RwLock<ChainStore>>,
    db: Arc<RwLock<MemoryStateStore>>,
    orderer: Arc<Mutex<TransactionOrderer>>,
    engine: Arc<Mutex<NodeEngine>>,
    queue: ConsensusQueue,
    network: ChannelNetwork,
    outbound: Mutex<Option<Outbound>>,
    event_tx: broadcast::Sender<NodeEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Node {
    /// Create a node from validated configuration.
    ///
    /// Stored blocks are replayed before the engine starts, so the engine
    /// begins at the round after the stored tip.
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing stakebft node");
        config.validate()?;

        let keypair = config.node.keypair()?;
        let genesis = config.genesis.build_block()?;
        let chain = ChainStore::open(config.storage.chain_config(), genesis)
            .context("Failed to open block store")?;

        let mut db = MemoryStateStore::new();
        let mut orderer = TransactionOrderer::new(config.mempool.orderer_config());
        Self::replay_chain(&chain, &mut db, &mut orderer)?;

        let chain = Arc::new(RwLock::new(chain));
        let db = Arc::new(RwLock::new(db));
        let orderer = Arc::new(Mutex::new(orderer));

        let (network, outbound) = ChannelNetwork::channel(config.node.protocol_version.clone());
        let mut engine = ConsensusEngine::new(
            config.consensus.engine_config(),
            keypair,
            Arc::clone(&chain),
            Arc::clone(&db),
            Arc::clone(&orderer),
            network.clone(),
        )?;
        engine.init();
        let queue = engine.queue();

        let (event_tx, _) = broadcast::channel(1000);
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            address = %engine.address(),
            height = chain.read().last_number(),
            "Node initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            status: Arc::new(RwLock::new(NodeStatus::Starting)),
            chain,
            db,
            orderer,
            engine: Arc::new(Mutex::new(engine)),
            queue,
            network,
            outbound: Mutex::new(Some(outbound)),
            event_tx,
            shutdown_tx,
        })
    }

    /// Applies every stored block, genesis included, to an empty state tree
    /// and to the nonce trackers.
    fn replay_chain(
        chain: &ChainStore,
        db: &mut MemoryStateStore,
        orderer: &mut TransactionOrderer,
    ) -> Result<()> {
        let last = chain.last_number();
        for number in 0..=last {
            let Some(block) = chain.block_at(number) else {
                bail!("Block {number} is missing from the block store");
            };
            let Some(snapshot) = db.verify_block_on_snapshot(&block) else {
                bail!("Stored block {number} does not apply to the state");
            };
            db.finalize(snapshot.clone());
            db.set_db_to_snapshot(snapshot);
            orderer.cleanup_for_block(&block);
        }
        debug!(blocks = last + 1, "Replayed stored chain");
        Ok(())
    }

    /// Node configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current node status.
    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    /// Shared chain store.
    pub fn chain(&self) -> &Arc<RwLock<ChainStore>> {
        &self.chain
    }

    /// Shared state tree.
    pub fn db(&self) -> &Arc<RwLock<MemoryStateStore>> {
        &self.db
    }

    /// Shared transaction orderer.
    pub fn orderer(&self) -> &Arc<Mutex<TransactionOrderer>> {
        &self.orderer
    }

    /// Height of the chain tip.
    pub fn last_number(&self) -> u64 {
        self.chain.read().last_number()
    }

    /// Round the engine is deciding.
    pub fn consensus_number(&self) -> u64 {
        self.engine.lock().state().number
    }

    /// Exportable consensus state.
    pub fn consensus_snapshot(&self) -> ConsensusSnapshot {
        self.engine.lock().snapshot()
    }

    /// Takes the outbound message receiver. Returns `None` once taken.
    pub fn take_outbound(&self) -> Option<Outbound> {
        self.outbound.lock().take()
    }

    /// Subscribe to node events.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.event_tx.subscribe()
    }

    /// Handle that stops [`Node::run`].
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Asks peers for blocks after the local tip.
    pub fn request_sync(&self) {
        let last_block = self.chain.read().last_block().clone();
        self.network
            .send(MessageBody::ChainSubsectionRequest { last_block });
    }

    /// Runs one engine tick.
    pub fn tick(&self) {
        let before = self.last_number();
        self.engine.lock().tick();
        self.announce_blocks_after(before);
    }

    /// Run the node until shutdown is requested.
    pub async fn run(&self) -> Result<()> {
        info!("Starting stakebft node");
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.consensus.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.request_sync();
        self.set_status(NodeStatus::Running);
        info!(height = self.last_number(), "Node is running");

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating shutdown");
                    break;
                }
            }
        }

        self.set_status(NodeStatus::Stopped);
        info!(height = self.last_number(), "Node stopped");
        Ok(())
    }

    /// Dispatches a message received from a peer. Returns the reply to send
    /// back to that peer, if any.
    pub fn handle_message(&self, message: NetworkMessage) -> Option<NetworkMessage> {
        if !message.is_compatible(&self.config.node.protocol_version) {
            debug!(
                version = %message.protocol_version,
                "Dropping message with incompatible protocol version"
            );
            return None;
        }

        match message.body {
            MessageBody::Transaction { tx } => {
                self.handle_transaction(tx);
                None
            }
            MessageBody::Consensus { tx, block } => {
                trace!(tx = %tx.hash, "Queued consensus message");
                self.queue.push_vote(tx, block);
                None
            }
            MessageBody::ChainSubsectionRequest { last_block } => {
                self.answer_section_request(&last_block)
            }
            MessageBody::ChainSubsection {
                chain_subsection,
                number,
                consensus_state,
            } => self.handle_subsection(chain_subsection, number, consensus_state),
        }
    }

    /// Admits a peer transaction into the pool and the pending state.
    fn handle_transaction(&self, tx: Transaction) {
        if let Err(e) = tx.verify() {
            debug!(tx = %tx.hash, error = %e, "Dropping transaction with bad signature");
            return;
        }
        if tx
            .operation
            .writes()
            .iter()
            .any(|(path, _)| path.starts_with(CONSENSUS_ROOT))
        {
            warn!(tx = %tx.hash, "Consensus writes must travel as consensus messages");
            return;
        }
        if !self.orderer.lock().is_eligible(&tx) {
            return;
        }
        if let Err(e) = self.db.write().execute_transaction(&tx) {
            debug!(tx = %tx.hash, error = %e, "Dropping transaction that fails on pending state");
            return;
        }
        if self.orderer.lock().add(tx.clone()) {
            trace!(tx = %tx.hash, "Pooled transaction");
            self.network.broadcast_transaction(&tx);
        }
    }

    fn answer_section_request(&self, last_block: &Block) -> Option<NetworkMessage> {
        let (response, number) = {
            let chain = self.chain.read();
            (chain.request_section(last_block), chain.last_number())
        };
        let chain_subsection = match response {
            SectionResponse::Section(blocks) => blocks,
            SectionResponse::UpToDate => Vec::new(),
            SectionResponse::Invalid => {
                debug!(number = last_block.number(), "Ignoring request for unknown block");
                return None;
            }
        };
        debug!(
            from = last_block.number(),
            blocks = chain_subsection.len(),
            "Answering chain subsection request"
        );
        let consensus_state = Some(self.consensus_snapshot());
        Some(self.network.message(MessageBody::ChainSubsection {
            chain_subsection,
            number,
            consensus_state,
        }))
    }

    fn handle_subsection(
        &self,
        section: Vec<Block>,
        number: u64,
        consensus_state: Option<ConsensusSnapshot>,
    ) -> Option<NetworkMessage> {
        let before = self.last_number();
        let appended = {
            let mut engine = self.engine.lock();
            let appended = engine.merge_chain_subsection(section);
            let peer_ahead = consensus_state
                .as_ref()
                .is_some_and(|peer| peer.number > engine.state().number);
            if !appended.is_empty() || peer_ahead {
                if let Err(e) = engine.catch_up(consensus_state.as_ref()) {
                    warn!(error = %e, "Catch-up failed, restarting round from chain tip");
                    engine.init();
                }
            }
            appended
        };
        self.announce_blocks_after(before);

        let current = self.last_number();
        if number > current {
            let _ = self.event_tx.send(NodeEvent::SyncProgress {
                current,
                target: number,
            });
            if !appended.is_empty() {
                let last_block = self.chain.read().last_block().clone();
                return Some(
                    self.network
                        .message(MessageBody::ChainSubsectionRequest { last_block }),
                );
            }
        }
        None
    }

    fn announce_blocks_after(&self, before: u64) {
        let blocks: Vec<Block> = {
            let chain = self.chain.read();
            (before + 1..=chain.last_number())
                .filter_map(|n| chain.block_at(n))
                .collect()
        };
        for block in blocks {
            let _ = self.event_tx.send(NodeEvent::BlockCommitted {
                number: block.number(),
                hash: block.hash,
            });
        }
    }

    fn set_status(&self, status: NodeStatus) {
        *self.status.write() = status;
        let _ = self.event_tx.send(NodeEvent::StatusChanged(status));
    }
}
