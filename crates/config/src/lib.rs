//! # stakebft configuration
//!
//! Configuration parsing and genesis handling for stakebft nodes.
//!
//! A node reads everything from one TOML file. Every section has defaults
//! except the keys: `[node].private_key` and `[genesis].owner_private_key`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stakebft_config::Config;
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("stakebft.toml"))?;
//! let genesis = config.genesis.build_block()?;
//! let engine_config = config.consensus.engine_config();
//! ```
//!
//! ## Configuration Sections
//!
//! - `[node]` - signing key and protocol version
//! - `[consensus]` - tick interval, proposer seed lookback, stall detection
//! - `[mempool]` - pool and tracker timeouts
//! - `[storage]` - block directory and in-memory window
//! - `[logging]` - level and output format
//! - `[genesis]` - owner key, validators and initial state values

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

mod config;
mod error;
mod genesis;

pub use config::*;
pub use error::*;
pub use genesis::*;
