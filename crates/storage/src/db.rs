//! On-disk block files
//!
//! Every committed block is written to its own JSON file named
//! `{number}-{short last hash}-{short hash}.json` inside the chain data
//! directory. Writes go through a temporary file and a rename so a crash
//! never leaves a half-written block behind, and writing a block whose file
//! already exists is a no-op.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use stakebft_types::Block;
use tracing::{debug, info, warn};

use crate::{Result, StorageError};

const BLOCK_FILE_EXTENSION: &str = "json";

/// Directory of block files indexed by height.
#[derive(Debug)]
pub struct BlockDirectory {
    path: PathBuf,
    index: BTreeMap<u64, PathBuf>,
}

impl BlockDirectory {
    /// Opens (creating if needed) a block directory and indexes its files.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        let mut index = BTreeMap::new();
        for entry in fs::read_dir(&path)? {
            let file = entry?.path();
            if file.extension().and_then(|e| e.to_str()) != Some(BLOCK_FILE_EXTENSION) {
                continue;
            }
            match parse_number(&file) {
                Some(number) => {
                    if let Some(previous) = index.insert(number, file.clone()) {
                        warn!(number, ?previous, ?file, "duplicate block file for height");
                    }
                }
                None => debug!(?file, "ignoring file without a block number prefix"),
            }
        }
        info!(path = %path.display(), blocks = index.len(), "opened block directory");
        Ok(Self { path, index })
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of indexed block files.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when no block files are indexed.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Highest indexed height.
    pub fn last_number(&self) -> Option<u64> {
        self.index.keys().next_back().copied()
    }

    /// Writes a block file. Returns `false` when the file already existed.
    pub fn write(&mut self, block: &Block) -> Result<bool> {
        let file = self.path.join(block.file_name());
        if file.exists() {
            self.index.insert(block.number(), file);
            return Ok(false);
        }
        let bytes = block
            .to_json()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp = file.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &file)?;
        debug!(number = block.number(), file = %file.display(), "wrote block file");
        self.index.insert(block.number(), file);
        Ok(true)
    }

    /// Reads the block stored for `number`.
    pub fn read(&self, number: u64) -> Result<Option<Block>> {
        let Some(file) = self.index.get(&number) else {
            return Ok(None);
        };
        let bytes = fs::read(file)?;
        Block::from_json(&bytes)
            .map(Some)
            .ok_or_else(|| StorageError::Serialization(format!("corrupt block file {}", file.display())))
    }

    /// Reads every indexed block in ascending height order.
    pub fn load_all(&self) -> Result<Vec<Block>> {
        let mut blocks = Vec::with_capacity(self.index.len());
        for number in self.index.keys() {
            if let Some(block) = self.read(*number)? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    /// Deletes every block file.
    pub fn clear(&mut self) -> Result<()> {
        for file in self.index.values() {
            fs::remove_file(file)?;
        }
        warn!(path = %self.path.display(), removed = self.index.len(), "cleared block directory");
        self.index.clear();
        Ok(())
    }
}

fn parse_number(file: &Path) -> Option<u64> {
    file.file_stem()?.to_str()?.split('-').next()?.parse().ok()
}
