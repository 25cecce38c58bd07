//! Outbound message channel.
//!
//! The node does not own a transport. Everything it wants to send to peers
//! is wrapped in a [`NetworkMessage`] and pushed onto an unbounded channel;
//! whoever embeds the node drains the receiver and delivers the messages.

use stakebft_consensus::{ConsensusNetwork, MessageBody, NetworkMessage};
use stakebft_types::{Block, Transaction};
use tokio::sync::mpsc;
use tracing::trace;

/// Receiving end of the outbound channel.
pub type Outbound = mpsc::UnboundedReceiver<NetworkMessage>;

/// [`ConsensusNetwork`] that queues messages for an external transport.
#[derive(Debug, Clone)]
pub struct ChannelNetwork {
    protocol_version: String,
    sender: mpsc::UnboundedSender<NetworkMessage>,
}

impl ChannelNetwork {
    /// Creates the network handle and the receiver the transport drains.
    pub fn channel(protocol_version: impl Into<String>) -> (Self, Outbound) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let network = Self {
            protocol_version: protocol_version.into(),
            sender,
        };
        (network, receiver)
    }

    /// Protocol version stamped on outgoing messages.
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Wraps `body` with the node's protocol version.
    pub fn message(&self, body: MessageBody) -> NetworkMessage {
        NetworkMessage::with_version(self.protocol_version.clone(), body)
    }

    /// Queues `body` for every peer.
    pub fn send(&self, body: MessageBody) {
        if self.sender.send(self.message(body)).is_err() {
            trace!("outbound channel closed, dropping message");
        }
    }

    /// Gossips an ordinary transaction.
    pub fn broadcast_transaction(&self, tx: &Transaction) {
        self.send(MessageBody::Transaction { tx: tx.clone() });
    }
}

impl ConsensusNetwork for ChannelNetwork {
    fn broadcast_consensus(&self, tx: &Transaction, block: Option<&Block>) {
        self.send(MessageBody::Consensus {
            tx: tx.clone(),
            block: block.cloned(),
        });
    }

    fn request_chain_subsection(&self, last_block: &Block) {
        self.send(MessageBody::ChainSubsectionRequest {
            last_block: last_block.clone(),
        });
    }
}
