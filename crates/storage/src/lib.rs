//! stakebft storage layer
//!
//! This crate owns everything the node keeps between rounds:
//!
//! - **Chain**: the committed, hash-linked block log with a bounded in-memory
//!   window ([`ChainStore`])
//! - **Block files**: one JSON file per committed block ([`BlockDirectory`])
//! - **Candidate pool**: proposed blocks that are not final yet ([`BlockPool`])
//! - **State**: the replicated key-value tree behind the [`StateStore`] trait,
//!   with an in-memory implementation ([`MemoryStateStore`])

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod chain;
pub mod db;
pub mod pool;
pub mod state;

pub use chain::{
    is_valid_chain, is_valid_chain_subsection, ChainConfig, ChainStore, SectionResponse,
    DEFAULT_BLOCKS_IN_MEMORY, DEFAULT_SUBSECTION_LENGTH,
};
pub use db::BlockDirectory;
pub use pool::BlockPool;
pub use state::{MemorySnapshot, MemoryStateStore, StateStore};

use thiserror::Error;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid storage configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Write to a path the signer may not touch
    #[error("Permission denied at {path}: {reason}")]
    PermissionDenied {
        /// Target path
        path: String,
        /// Why the write was refused
        reason: String,
    },

    /// Value of the wrong shape for its path
    #[error("Invalid value at {path}: {reason}")]
    InvalidValue {
        /// Target path
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
