//! # stakebft mempool
//!
//! Pending transaction pool for the stakebft consensus engine.
//!
//! The [`TransactionOrderer`]:
//! - Verifies signatures and deduplicates by hash on admission
//! - Keeps per-address queues and committed/pending [`NonceTrackers`]
//! - Produces a deterministic, nonce-causal batch for block proposals
//!   and for re-applying pending state
//! - Purges committed transactions and evicts timed-out ones after each block
//!
//! ## Example
//!
//! ```rust
//! use stakebft_mempool::{OrdererConfig, TransactionOrderer};
//! use stakebft_types::{Keypair, Operation, Transaction};
//!
//! let key = Keypair::random();
//! let mut orderer = TransactionOrderer::new(OrdererConfig::default());
//! let tx = Transaction::sign(&key, 0, 1, Operation::set_value("/a", 1.into())).unwrap();
//! assert!(orderer.is_eligible(&tx));
//! assert!(orderer.add(tx));
//! assert_eq!(orderer.ordered_batch().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod pool;
pub mod tracker;

pub use pool::{OrdererConfig, TransactionOrderer};
pub use tracker::{NonceTrackers, TxStatus};

use stakebft_types::H256;

/// Result type alias for mempool operations
pub type Result<T> = std::result::Result<T, MempoolError>;

/// Reasons a transaction is turned away
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    /// Transaction is already tracked
    #[error("transaction {0} already tracked")]
    AlreadyExists(H256),

    /// Signature or hash did not verify
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Nonce is at or below the committed nonce
    #[error("nonce too low: committed {committed}, got {actual}")]
    NonceTooLow {
        /// Highest committed nonce
        committed: i64,
        /// Nonce provided
        actual: i64,
    },

    /// Transaction is older than the pool timeout
    #[error("transaction {hash} timed out: timestamp {timestamp}, last block at {last_block_timestamp}")]
    TimedOut {
        /// Transaction hash
        hash: H256,
        /// Transaction timestamp
        timestamp: u64,
        /// Timestamp of the last committed block
        last_block_timestamp: u64,
    },
}
