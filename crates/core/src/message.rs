//! Wire message types.
//!
//! Messages carry identifiers and small payloads only. A `Block` message
//! names the block being transmitted; the receiver resolves it through the
//! shared ledger.

use btcsim_types::{BlockId, NodeIndex, TxId};

/// Any message a node can send to another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Gossip(GossipMessage),
    Topology(TopologyMessage),
}

impl Message {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Gossip(message) => message.type_name(),
            Message::Topology(message) => message.type_name(),
        }
    }

    /// Check if this message carries a block.
    pub fn is_block(&self) -> bool {
        matches!(self, Message::Gossip(GossipMessage::Block { .. }))
    }
}

impl From<GossipMessage> for Message {
    fn from(message: GossipMessage) -> Self {
        Message::Gossip(message)
    }
}

impl From<TopologyMessage> for Message {
    fn from(message: TopologyMessage) -> Self {
        Message::Topology(message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Block / Transaction Relay
// ═══════════════════════════════════════════════════════════════════════════

/// Block and transaction relay messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipMessage {
    /// Ask for everything after each listed block.
    GetBlocks { headers: Vec<BlockId> },

    /// Offer a set of blocks.
    Inv { headers: Vec<BlockId> },

    /// Request the listed blocks.
    GetData { headers: Vec<BlockId> },

    /// One block being transmitted.
    Block { block: BlockId },

    /// One transaction being transmitted.
    Tx { tx: TxId },
}

impl GossipMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            GossipMessage::GetBlocks { .. } => "GetBlocks",
            GossipMessage::Inv { .. } => "Inv",
            GossipMessage::GetData { .. } => "GetData",
            GossipMessage::Block { .. } => "Block",
            GossipMessage::Tx { .. } => "Tx",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Overlay Maintenance
// ═══════════════════════════════════════════════════════════════════════════

/// Overlay construction and liveness messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyMessage {
    /// Open a connection (handshake request).
    Version,

    /// Accept a connection (handshake reply).
    VerAck,

    /// Ask for a sample of the peer's address book.
    GetAddr,

    /// Announce peer addresses.
    Addr { peers: Vec<NodeIndex> },

    Ping,

    Pong,

    /// Drop the link between sender and receiver.
    Disconnect,
}

impl TopologyMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            TopologyMessage::Version => "Version",
            TopologyMessage::VerAck => "VerAck",
            TopologyMessage::GetAddr => "GetAddr",
            TopologyMessage::Addr { .. } => "Addr",
            TopologyMessage::Ping => "Ping",
            TopologyMessage::Pong => "Pong",
            TopologyMessage::Disconnect => "Disconnect",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_and_block_detection() {
        let block: Message = GossipMessage::Block { block: BlockId(4) }.into();
        let addr: Message = TopologyMessage::Addr { peers: vec![1, 2] }.into();

        assert_eq!(block.type_name(), "Block");
        assert_eq!(addr.type_name(), "Addr");
        assert!(block.is_block());
        assert!(!addr.is_block());
        assert!(!Message::from(GossipMessage::Tx { tx: TxId(0) }).is_block());
    }
}
