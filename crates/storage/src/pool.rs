//! Candidate block pool
//!
//! Blocks that arrived with a proposal but are not final yet, keyed by
//! height. Only [`crate::ChainStore`] writes to the pool.

use std::collections::BTreeMap;

use stakebft_types::Block;
use tracing::trace;

/// Height-indexed candidate blocks.
#[derive(Debug, Default)]
pub struct BlockPool {
    blocks: BTreeMap<u64, Block>,
}

impl BlockPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a candidate. The first candidate recorded for a height wins.
    pub fn insert(&mut self, block: Block) -> bool {
        let number = block.number();
        if self.blocks.contains_key(&number) {
            return false;
        }
        trace!(number, hash = %block.hash, "recorded candidate block");
        self.blocks.insert(number, block);
        true
    }

    /// Candidate at `number`.
    pub fn get(&self, number: u64) -> Option<&Block> {
        self.blocks.get(&number)
    }

    /// Drops every candidate at or below `number`.
    pub fn evict_through(&mut self, number: u64) -> usize {
        let keep = self.blocks.split_off(&(number.saturating_add(1)));
        let evicted = std::mem::replace(&mut self.blocks, keep).len();
        if evicted > 0 {
            trace!(number, evicted, "evicted candidate blocks");
        }
        evicted
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True if there are no candidates.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
