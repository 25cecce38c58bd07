//! # stakebft
//!
//! stakebft is a stake-weighted BFT consensus node. Validators agree on one
//! block per round by writing their stake to reserved paths of a replicated
//! state tree; a block commits once two thirds of the round's stake has
//! precommitted.
//!
//! This crate provides the node binary and can also be used as a library
//! for embedding a node behind any transport.
//!
//! ## Components
//!
//! - [`Node`] - Wires chain, state, transaction pool and consensus engine
//! - [`ChannelNetwork`] - Outbound message queue drained by the transport
//!
//! ## Example
//!
//! ```rust,no_run
//! use stakebft::Node;
//! use stakebft_config::Config;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Path::new("stakebft.toml"))?;
//!     let node = Node::new(config)?;
//!
//!     // Hand outbound messages to the transport.
//!     let mut outbound = node.take_outbound().expect("fresh node");
//!     tokio::spawn(async move {
//!         while let Some(message) = outbound.recv().await {
//!             let _bytes = message.to_json();
//!         }
//!     });
//!
//!     node.run().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod network;
pub mod node;

pub use network::{ChannelNetwork, Outbound};
pub use node::{Node, NodeEngine, NodeEvent, NodeStatus};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "stakebft.toml";

/// Default data directory
pub const DEFAULT_DATA_DIR: &str = ".stakebft";

/// Re-export commonly used types from dependencies
pub mod prelude {
    //! Commonly used types for convenience
    pub use super::{Node, NodeEvent, NodeStatus};
    pub use stakebft_config::Config;
    pub use stakebft_consensus::{MessageBody, NetworkMessage};
    pub use stakebft_types::{Address, Block, Keypair, Transaction, H256};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_CONFIG_FILE, "stakebft.toml");
        assert_eq!(DEFAULT_DATA_DIR, ".stakebft");
    }
}
