//! Node state machine.

use btcsim_core::{Action, Event, HandlerContext, Prototype, StateMachine};
use btcsim_gossip::{GossipConfig, GossipProtocol};
use btcsim_topology::{TopologyConfig, TopologyProtocol};
use btcsim_types::{BlockId, NodeIndex};
use tracing::instrument;

/// Combined node state machine.
///
/// Owns one relay instance and one overlay instance. The overlay is the
/// single source of truth for who this node's neighbours are; every relay
/// event is handled with the neighbour list as it stands at dispatch time.
#[derive(Debug, Clone)]
pub struct NodeStateMachine {
    index: NodeIndex,
    gossip: GossipProtocol,
    topology: TopologyProtocol,
}

impl NodeStateMachine {
    pub fn new(index: NodeIndex, gossip: GossipConfig, topology: TopologyConfig) -> Self {
        Self {
            index,
            gossip: GossipProtocol::new(index, gossip),
            topology: TopologyProtocol::new(index, topology),
        }
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn gossip(&self) -> &GossipProtocol {
        &self.gossip
    }

    pub fn gossip_mut(&mut self) -> &mut GossipProtocol {
        &mut self.gossip
    }

    pub fn topology(&self) -> &TopologyProtocol {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut TopologyProtocol {
        &mut self.topology
    }

    /// Tip of this node's believed-longest chain.
    pub fn longest_chain(&self) -> BlockId {
        self.gossip.blockchain().longest_chain()
    }

    /// Fork distances of this node's view, canonical fork included.
    pub fn fork_distances(&self) -> Vec<u64> {
        self.gossip.blockchain().fork_distances()
    }
}

impl StateMachine for NodeStateMachine {
    type Event = Event;

    #[instrument(skip_all, fields(node = self.index, event = event.type_name()))]
    fn handle(&mut self, ctx: &mut HandlerContext<'_>, event: Event) -> Vec<Action> {
        let neighbors = self.topology.neighbors();
        let mut ctx = ctx.reborrow(&neighbors);
        match event {
            Event::Gossip(event) => self.gossip.handle(&mut ctx, event),
            Event::Topology(event) => self.topology.handle(&mut ctx, event),
        }
    }
}

impl Prototype for NodeStateMachine {
    fn clone_for(&self, node: NodeIndex) -> Self {
        Self {
            index: node,
            gossip: self.gossip.clone_for(node),
            topology: self.topology.clone_for(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btcsim_core::{GossipEvent, GossipMessage, Message, TopologyEvent, TopologyMessage};
    use btcsim_test_helpers::{sent, Harness};
    use btcsim_topology::Direction;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn node(index: NodeIndex) -> NodeStateMachine {
        NodeStateMachine::new(index, GossipConfig::non_mining(), TopologyConfig::default())
    }

    #[traced_test]
    #[test]
    fn test_relay_uses_current_connections() {
        let mut h = Harness::new(1);
        let mut node = node(0);
        node.topology_mut().establish(4, Direction::Outgoing, Duration::ZERO);
        node.topology_mut().establish(2, Direction::Incoming, Duration::ZERO);
        let tx = h.issue_transactions(1)[0];

        let actions = node.handle(
            &mut h.ctx(&[]),
            Event::Gossip(GossipEvent::MessageReceived {
                from: None,
                message: GossipMessage::Tx { tx },
            }),
        );

        assert_eq!(
            sent(&actions),
            vec![
                (4, Message::Gossip(GossipMessage::Tx { tx })),
                (2, Message::Gossip(GossipMessage::Tx { tx })),
            ]
        );
    }

    #[test]
    fn test_topology_events_reach_the_overlay() {
        let mut h = Harness::new(2);
        let mut node = node(0);

        let actions = node.handle(
            &mut h.ctx(&[]),
            Event::Topology(TopologyEvent::MessageReceived {
                from: 3,
                message: TopologyMessage::Version,
            }),
        );

        assert!(sent(&actions).contains(&(3, Message::Topology(TopologyMessage::VerAck))));
        assert!(node.topology().is_connected(3));
        assert_eq!(node.longest_chain(), BlockId::GENESIS);
        assert_eq!(node.fork_distances(), vec![0]);
    }

    #[test]
    fn test_clone_for_renames_both_protocols() {
        let mut prototype = node(0);
        prototype.topology_mut().add_known_peer(5);

        let clone = prototype.clone_for(7);
        assert_eq!(clone.index(), 7);
        assert_eq!(clone.gossip().node(), 7);
        assert_eq!(clone.topology().node(), 7);
        assert!(clone.topology().knows(5));
    }
}
