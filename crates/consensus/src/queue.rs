//! Consensus work queue.
//!
//! The network side pushes incoming consensus transactions and the engine
//! pushes `Proceed` markers for itself. The engine pops one message per
//! tick; an empty queue means "proceed with the current round".

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use stakebft_types::{Block, Transaction};

use crate::types::Step;

/// A unit of work for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedMessage {
    /// Re-evaluate the round; ignored if older than the engine's state
    Proceed {
        /// Round the marker was issued for
        number: u64,
        /// Step the marker was issued for
        step: Step,
    },
    /// A consensus transaction received from a peer
    HandleVote {
        /// The transaction
        tx: Transaction,
        /// Proposed block, for proposals
        block: Option<Block>,
    },
}

/// Shared FIFO of [`QueuedMessage`]s. Cloning shares the queue.
#[derive(Debug, Clone, Default)]
pub struct ConsensusQueue {
    inner: Arc<Mutex<VecDeque<QueuedMessage>>>,
}

impl ConsensusQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `Proceed` unless an identical one is already waiting.
    pub fn push_proceed(&self, number: u64, step: Step) -> bool {
        let msg = QueuedMessage::Proceed { number, step };
        let mut queue = self.inner.lock();
        if queue.contains(&msg) {
            return false;
        }
        queue.push_back(msg);
        true
    }

    /// Appends a received consensus transaction.
    pub fn push_vote(&self, tx: Transaction, block: Option<Block>) {
        self.inner
            .lock()
            .push_back(QueuedMessage::HandleVote { tx, block });
    }

    /// Takes the oldest message.
    pub fn pop(&self) -> Option<QueuedMessage> {
        self.inner.lock().pop_front()
    }

    /// Number of waiting messages.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
