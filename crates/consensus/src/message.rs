//! Peer-to-peer message envelope.
//!
//! Every message carries the sender's protocol version; receivers drop
//! messages whose version they do not speak. Bodies are tagged with `type`
//! in JSON.

use serde::{Deserialize, Serialize};
use stakebft_types::{Block, Transaction};

use crate::types::ConsensusSnapshot;

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Envelope for everything exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMessage {
    /// Sender's protocol version
    pub protocol_version: String,
    /// Payload
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    /// An ordinary transaction
    Transaction {
        /// The transaction
        tx: Transaction,
    },
    /// A consensus transaction, with the block for proposals
    Consensus {
        /// The transaction
        tx: Transaction,
        /// Proposed block
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block: Option<Block>,
    },
    /// Ask for the blocks following `last_block`
    ChainSubsectionRequest {
        /// Requester's tip
        last_block: Block,
    },
    /// Answer to [`MessageBody::ChainSubsectionRequest`]
    ChainSubsection {
        /// Blocks following the requester's tip; empty if up to date
        chain_subsection: Vec<Block>,
        /// Responder's chain height
        number: u64,
        /// Responder's consensus state
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consensus_state: Option<ConsensusSnapshot>,
    },
}

impl NetworkMessage {
    /// Wraps `body` with this build's protocol version.
    pub fn new(body: MessageBody) -> Self {
        Self::with_version(PROTOCOL_VERSION, body)
    }

    /// Wraps `body` with an explicit protocol version.
    pub fn with_version(version: impl Into<String>, body: MessageBody) -> Self {
        Self {
            protocol_version: version.into(),
            body,
        }
    }

    /// Whether the sender speaks `version`.
    pub fn is_compatible(&self, version: &str) -> bool {
        self.protocol_version == version
    }

    /// JSON encoding.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parses a JSON-encoded message.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
