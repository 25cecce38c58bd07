//! Committed chain storage
//!
//! [`ChainStore`] owns the committed chain, the candidate pool and the block
//! files on disk. Only a trailing window of committed blocks is kept in
//! memory; older ones are read back from disk on demand. A block leaves the
//! window only after its file has been written, so every committed block is
//! always reachable from memory or disk.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;

use stakebft_types::{Block, H256};
use tracing::{debug, error, info, warn};

use crate::db::BlockDirectory;
use crate::pool::BlockPool;
use crate::{Result, StorageError};

/// Default number of committed blocks kept in memory
pub const DEFAULT_BLOCKS_IN_MEMORY: usize = 10;

/// Default number of blocks served per chain subsection
pub const DEFAULT_SUBSECTION_LENGTH: usize = 20;

/// Chain storage configuration
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Directory for block files; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Committed blocks retained in memory
    pub blocks_in_memory: usize,
    /// Maximum blocks returned by [`ChainStore::request_section`]
    pub subsection_length: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            blocks_in_memory: DEFAULT_BLOCKS_IN_MEMORY,
            subsection_length: DEFAULT_SUBSECTION_LENGTH,
        }
    }
}

impl ChainConfig {
    /// In-memory configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration persisting blocks under `dir`.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Default::default()
        }
    }
}

/// Answer to a chain subsection request.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionResponse {
    /// The requester already holds our tip
    UpToDate,
    /// The reference block is not part of our history
    Invalid,
    /// Blocks starting at the reference height
    Section(Vec<Block>),
}

/// Committed chain, candidate pool and block files.
#[derive(Debug)]
pub struct ChainStore {
    config: ChainConfig,
    genesis: Block,
    /// Contiguous tail of the chain, oldest first
    blocks: VecDeque<Block>,
    files: Option<BlockDirectory>,
    /// Heights whose files have not been written yet
    unpersisted: BTreeSet<u64>,
    pool: BlockPool,
}

impl ChainStore {
    /// Chain holding only `genesis`, never touching disk.
    pub fn in_memory(genesis: Block) -> Self {
        Self {
            config: ChainConfig::in_memory(),
            blocks: VecDeque::from([genesis.clone()]),
            genesis,
            files: None,
            unpersisted: BTreeSet::new(),
            pool: BlockPool::new(),
        }
    }

    /// Opens the chain described by `config`.
    ///
    /// Block files are loaded in height order and validated against
    /// `genesis`. An invalid directory is cleared and the chain restarts
    /// from genesis.
    pub fn open(config: ChainConfig, genesis: Block) -> Result<Self> {
        if config.blocks_in_memory == 0 {
            return Err(StorageError::InvalidConfig(
                "blocks_in_memory must be at least 1".into(),
            ));
        }
        let Some(dir) = config.data_dir.clone() else {
            return Ok(Self {
                config,
                ..Self::in_memory(genesis)
            });
        };
        let mut files = BlockDirectory::open(&dir)?;
        let mut loaded = files.load_all()?;
        if !loaded.is_empty() && !is_valid_chain(&loaded, &genesis) {
            error!(path = %dir.display(), "stored chain is invalid, restarting from genesis");
            files.clear()?;
            loaded.clear();
        }
        if loaded.is_empty() {
            files.write(&genesis)?;
            loaded.push(genesis.clone());
        }
        let mut store = Self {
            config,
            genesis,
            blocks: loaded.into(),
            files: Some(files),
            unpersisted: BTreeSet::new(),
            pool: BlockPool::new(),
        };
        store.trim();
        info!(
            last_number = store.last_number(),
            last_hash = %store.last_hash(),
            "chain opened"
        );
        Ok(store)
    }

    /// Configuration in use.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// The genesis block.
    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    /// The most recently committed block.
    pub fn last_block(&self) -> &Block {
        self.blocks.back().unwrap_or(&self.genesis)
    }

    /// Height of the most recently committed block.
    pub fn last_number(&self) -> u64 {
        self.last_block().number()
    }

    /// Hash of the most recently committed block.
    pub fn last_hash(&self) -> H256 {
        self.last_block().hash
    }

    /// Committed blocks currently held in memory, oldest first.
    pub fn recent_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Committed block at `number`, from memory or disk.
    pub fn block_at(&self, number: u64) -> Option<Block> {
        if number > self.last_number() {
            return None;
        }
        let first = self.blocks.front().map(Block::number).unwrap_or(0);
        if number >= first {
            return self.blocks.get((number - first) as usize).cloned();
        }
        if number == 0 {
            return Some(self.genesis.clone());
        }
        let files = self.files.as_ref()?;
        match files.read(number) {
            Ok(block) => block,
            Err(e) => {
                warn!(number, error = %e, "failed to read block file");
                None
            }
        }
    }

    /// Appends the next block.
    ///
    /// The block must sit exactly one above the tip, link to it and carry
    /// valid hashes; otherwise the chain is left untouched. The new block is
    /// persisted together with any earlier block whose write failed.
    pub fn append(&mut self, block: Block) -> bool {
        let expected = self.last_number() + 1;
        if block.number() != expected {
            warn!(number = block.number(), expected, "refusing non-sequential block");
            return false;
        }
        if block.last_hash() != self.last_hash() {
            warn!(
                number = block.number(),
                last_hash = %block.last_hash(),
                tip = %self.last_hash(),
                "refusing block that does not link to the tip"
            );
            return false;
        }
        if !block.validate_hashes() {
            return false;
        }
        info!(number = block.number(), hash = %block.hash, txs = block.transactions.len(), "appended block");
        if self.files.is_some() {
            self.unpersisted.insert(block.number());
        }
        self.blocks.push_back(block);
        self.persist_pending();
        self.trim();
        true
    }

    fn persist_pending(&mut self) {
        let Some(files) = self.files.as_mut() else {
            return;
        };
        let first = self.blocks.front().map(Block::number).unwrap_or(0);
        let pending: Vec<u64> = self.unpersisted.iter().copied().collect();
        for number in pending {
            let Some(block) = number
                .checked_sub(first)
                .and_then(|offset| self.blocks.get(offset as usize))
            else {
                continue;
            };
            match files.write(block) {
                Ok(_) => {
                    self.unpersisted.remove(&number);
                }
                Err(e) => warn!(number, error = %e, "block write failed, retrying on next append"),
            }
        }
    }

    fn trim(&mut self) {
        if self.files.is_none() {
            return;
        }
        while self.blocks.len() > self.config.blocks_in_memory {
            let Some(oldest) = self.blocks.front().map(Block::number) else {
                break;
            };
            if self.unpersisted.contains(&oldest) {
                break;
            }
            self.blocks.pop_front();
        }
    }

    /// Blocks to send a peer whose tip is `reference`.
    pub fn request_section(&self, reference: &Block) -> SectionResponse {
        if reference.hash == self.last_hash() {
            return SectionResponse::UpToDate;
        }
        let start = reference.number();
        match self.block_at(start) {
            Some(local) if local.hash == reference.hash => {}
            _ => {
                debug!(number = start, hash = %reference.hash, "section request for unknown block");
                return SectionResponse::Invalid;
            }
        }
        let end = self
            .last_number()
            .min(start.saturating_add(self.config.subsection_length.max(1) as u64 - 1));
        let section: Vec<Block> = (start..=end).filter_map(|n| self.block_at(n)).collect();
        if section.len() as u64 != end - start + 1 {
            warn!(start, end, got = section.len(), "could not assemble full section");
            return SectionResponse::Invalid;
        }
        SectionResponse::Section(section)
    }

    /// Whether a received subsection extends the local chain.
    pub fn should_append_subsection(&self, section: &[Block]) -> bool {
        let (Some(first), Some(last)) = (section.first(), section.last()) else {
            debug!("empty chain subsection");
            return false;
        };
        if last.number() <= self.last_number() {
            debug!(
                received = last.number(),
                local = self.last_number(),
                "chain subsection is not newer than local chain"
            );
            return false;
        }
        let tip = self.last_block();
        let links = (first.number() == tip.number() && first.hash == tip.hash)
            || (first.number() == tip.number() + 1 && first.last_hash() == tip.hash);
        if !links {
            warn!(
                first = first.number(),
                tip = tip.number(),
                "chain subsection does not link to local tip"
            );
            return false;
        }
        is_valid_chain_subsection(section)
    }

    /// Appends every block of `section` above the local tip.
    ///
    /// `accept` runs before each append and may veto the block, which stops
    /// the merge there. Returns the blocks that were appended. Nothing is
    /// appended if the section fails [`ChainStore::should_append_subsection`].
    pub fn merge<F>(&mut self, section: Vec<Block>, mut accept: F) -> Vec<Block>
    where
        F: FnMut(&Block) -> bool,
    {
        if !self.should_append_subsection(&section) {
            return Vec::new();
        }
        let mut appended = Vec::new();
        for block in section {
            if block.number() <= self.last_number() {
                continue;
            }
            if !accept(&block) {
                warn!(number = block.number(), "merge stopped by rejected block");
                break;
            }
            if !self.append(block.clone()) {
                break;
            }
            appended.push(block);
        }
        if let Some(last) = appended.last() {
            self.pool.evict_through(last.number());
        }
        appended
    }

    /// Records a not-yet-final block.
    pub fn record_candidate(&mut self, block: Block) -> bool {
        if block.number() <= self.last_number() {
            return false;
        }
        self.pool.insert(block)
    }

    /// Candidate at `number`.
    pub fn candidate(&self, number: u64) -> Option<&Block> {
        self.pool.get(number)
    }

    /// Drops candidates at or below a newly committed height.
    pub fn evict_candidates_through(&mut self, number: u64) -> usize {
        self.pool.evict_through(number)
    }

    /// Number of candidate blocks.
    pub fn candidate_count(&self) -> usize {
        self.pool.len()
    }
}

/// A full chain: starts at `genesis` and every link is valid.
pub fn is_valid_chain(chain: &[Block], genesis: &Block) -> bool {
    match chain.first() {
        Some(first) if first.hash == genesis.hash && first.validate_hashes() => {
            is_valid_chain_subsection(chain)
        }
        Some(first) => {
            warn!(hash = %first.hash, "chain does not start at genesis");
            false
        }
        None => false,
    }
}

/// A contiguous run of blocks with valid hashes and links.
pub fn is_valid_chain_subsection(chain: &[Block]) -> bool {
    if let Some(first) = chain.first() {
        if !first.validate_hashes() {
            return false;
        }
    }
    chain.windows(2).all(|pair| {
        let (prev, next) = (&pair[0], &pair[1]);
        let ok = next.number() == prev.number() + 1
            && next.last_hash() == prev.hash
            && next.validate_hashes();
        if !ok {
            warn!(number = next.number(), "broken link in chain");
        }
        ok
    })
}
