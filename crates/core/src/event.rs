//! Events delivered to protocol instances.

use crate::{GossipMessage, Message, TopologyMessage};
use btcsim_types::{BlockId, NodeIndex, TxId};

/// Identifies which protocol instance on a node an event targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolId {
    Gossip,
    Topology,
}

/// An event addressed to one protocol instance of a node.
///
/// The variant selects the protocol, so dispatch is an exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Gossip(GossipEvent),
    Topology(TopologyEvent),
}

impl Event {
    /// The protocol this event is addressed to.
    pub fn protocol(&self) -> ProtocolId {
        match self {
            Event::Gossip(_) => ProtocolId::Gossip,
            Event::Topology(_) => ProtocolId::Topology,
        }
    }

    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Gossip(event) => event.type_name(),
            Event::Topology(event) => event.type_name(),
        }
    }

    /// Wrap a message arriving from `from` as an event for the matching protocol.
    pub fn received(from: NodeIndex, message: Message) -> Self {
        match message {
            Message::Gossip(message) => Event::Gossip(GossipEvent::MessageReceived {
                from: Some(from),
                message,
            }),
            Message::Topology(message) => {
                Event::Topology(TopologyEvent::MessageReceived { from, message })
            }
        }
    }
}

impl From<GossipEvent> for Event {
    fn from(event: GossipEvent) -> Self {
        Event::Gossip(event)
    }
}

impl From<TopologyEvent> for Event {
    fn from(event: TopologyEvent) -> Self {
        Event::Topology(event)
    }
}

/// Events handled by the block/transaction relay protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipEvent {
    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════
    /// Delivered once at the start of the run.
    Start,

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// A mining attempt completed.
    ///
    /// `attempt` identifies the attempt that scheduled this event; a handler
    /// that has since started another attempt treats the event as stale.
    BlockFound {
        attempt: u64,
        parent: BlockId,
        transactions: Vec<TxId>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// A message arrived. `from` is `None` for transactions injected by the
    /// workload generator rather than relayed by a peer.
    MessageReceived {
        from: Option<NodeIndex>,
        message: GossipMessage,
    },
}

impl GossipEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            GossipEvent::Start => "GossipStart",
            GossipEvent::BlockFound { .. } => "BlockFound",
            GossipEvent::MessageReceived { message, .. } => message.type_name(),
        }
    }
}

/// Events handled by the overlay maintenance protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════
    /// Delivered once at the start of the run.
    Start,

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Flush one connection's queued address announcements.
    FlushAddrTick,

    /// Queue this node's own address to every connection.
    QueueAddrTick,

    /// Ping every connection and evict silent ones.
    PingTick,

    /// Outgoing connection attempt number `attempt` to `peer` may have
    /// failed. Ignored unless that attempt is still the one in flight.
    ConnectTimeout { peer: NodeIndex, attempt: u64 },

    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    MessageReceived {
        from: NodeIndex,
        message: TopologyMessage,
    },
}

impl TopologyEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            TopologyEvent::Start => "TopologyStart",
            TopologyEvent::FlushAddrTick => "FlushAddrTick",
            TopologyEvent::QueueAddrTick => "QueueAddrTick",
            TopologyEvent::PingTick => "PingTick",
            TopologyEvent::ConnectTimeout { .. } => "ConnectTimeout",
            TopologyEvent::MessageReceived { message, .. } => message.type_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_received_routes_to_matching_protocol() {
        let gossip = Event::received(3, GossipMessage::Tx { tx: TxId(1) }.into());
        let topology = Event::received(3, TopologyMessage::Ping.into());

        assert_eq!(gossip.protocol(), ProtocolId::Gossip);
        assert_eq!(topology.protocol(), ProtocolId::Topology);
        assert_eq!(
            gossip,
            Event::Gossip(GossipEvent::MessageReceived {
                from: Some(3),
                message: GossipMessage::Tx { tx: TxId(1) },
            })
        );
        assert_eq!(topology.type_name(), "Ping");
    }
}
