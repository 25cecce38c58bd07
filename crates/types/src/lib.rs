//! # stakebft types
//!
//! Core type definitions shared by every stakebft crate:
//! - [`Address`] - 20-byte account addresses
//! - [`H256`] - 32-byte Keccak-256 digests
//! - [`Transaction`], [`Operation`] and [`Keypair`] - signed state writes
//! - [`Block`] and [`BlockHeader`] - hash-linked blocks and genesis construction
//! - [`ConsensusPath`] - typed view of the reserved `/consensus` state paths
//!
//! ## Example
//!
//! ```rust
//! use stakebft_types::{Keypair, Operation, Transaction};
//!
//! let key = Keypair::random();
//! let tx = Transaction::sign(&key, 0, 1_000, Operation::set_value("/a", 1.into())).unwrap();
//! assert!(tx.verify().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod address;
pub mod block;
pub mod hash;
pub mod paths;
pub mod transaction;

pub use address::Address;
pub use block::{now_millis, Block, BlockHeader, GenesisSpec, ValidatorSet};
pub use hash::H256;
pub use paths::ConsensusPath;
pub use transaction::{Keypair, Operation, Signature, Transaction, UNORDERED_NONCE};

/// Result type alias for stakebft type operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with core types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid address format
    #[error("invalid address format: {0}")]
    InvalidAddress(String),

    /// Invalid hash format
    #[error("invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid transaction
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Signature error
    #[error("signature error: {0}")]
    Signature(String),

    /// Key material error
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Canonical encoding failed
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Genesis configuration cannot produce a usable chain
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),
}
