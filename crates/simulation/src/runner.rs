//! Deterministic simulation runner.
//!
//! The runner owns every node, the shared ledger and the run's single random
//! generator. It pops the earliest event, lends a [`HandlerContext`] to the
//! target node, and turns the returned actions into future events.

use crate::event_queue::EventKey;
use crate::network::{Delivery, NetworkConfig, SimulatedNetwork};
use crate::SimulationError;
use btcsim_chain::Blockchain;
use btcsim_core::{
    Action, Event, GossipEvent, GossipMessage, HandlerContext, Message, Prototype, ProtocolId,
    StateMachine, TopologyEvent,
};
use btcsim_node::NodeStateMachine;
use btcsim_topology::Direction;
use btcsim_types::{BlockId, Ledger, NodeIndex, TxId};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Something a node reported while handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    BlockMined { block: BlockId },
    BlockLinked { block: BlockId },
    Reorg { old_tip: BlockId, new_tip: BlockId },
    ConnectionOpened { peer: NodeIndex, outgoing: bool },
    ConnectionClosed { peer: NodeIndex },
}

/// A notification stamped with when and where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub time: Duration,
    pub node: NodeIndex,
    pub kind: NotificationKind,
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Events processed by the relay protocol.
    pub gossip_events: u64,
    /// Events processed by the overlay protocol.
    pub topology_events: u64,
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages sent (successfully scheduled for delivery).
    pub messages_sent: u64,
    /// Delivered messages by type name.
    pub messages_by_type: BTreeMap<&'static str, u64>,
    /// Messages dropped due to network partition.
    pub messages_dropped_partition: u64,
    /// Messages dropped due to packet loss.
    pub messages_dropped_loss: u64,
    /// Block messages dropped while crossing the balance split.
    pub messages_dropped_split: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Transactions injected from outside the network.
    pub transactions_submitted: u64,
}

impl SimulationStats {
    /// Total messages dropped (partition + packet loss + split).
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_partition + self.messages_dropped_loss + self.messages_dropped_split
    }

    /// Message delivery rate (sent / (sent + dropped)).
    pub fn delivery_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_dropped();
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }

    /// Delivered messages of one type.
    pub fn messages_of_type(&self, type_name: &str) -> u64 {
        self.messages_by_type.get(type_name).copied().unwrap_or(0)
    }
}

/// Deterministic simulation runner.
///
/// Processes events in deterministic order and executes actions.
/// Given the same seed, produces identical results every run.
pub struct SimulationRunner {
    /// All nodes in the simulation, indexed by NodeIndex.
    nodes: Vec<NodeStateMachine>,

    /// Append-only block and transaction arenas shared by every node.
    ledger: Ledger,

    /// Every mined block, linked the moment it is mined.
    global_chain: Blockchain,

    /// Global event queue, ordered deterministically.
    event_queue: BTreeMap<EventKey, (NodeIndex, Event)>,

    /// Sequence counter for deterministic ordering.
    sequence: u64,

    /// Current simulation time.
    now: Duration,

    network: SimulatedNetwork,

    /// The run's only random generator.
    rng: ChaCha8Rng,

    stats: SimulationStats,

    notifications: Vec<Notification>,

    started: bool,
}

impl SimulationRunner {
    /// Create a runner with `num_nodes` nodes cloned from `prototype`.
    pub fn new(
        prototype: &NodeStateMachine,
        num_nodes: usize,
        network_config: NetworkConfig,
        seed: u64,
    ) -> Self {
        let nodes: Vec<NodeStateMachine> = (0..num_nodes)
            .map(|index| prototype.clone_for(index as NodeIndex))
            .collect();

        info!(num_nodes, seed, "Created simulation runner");

        Self {
            nodes,
            ledger: Ledger::new(),
            global_chain: Blockchain::new(),
            event_queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network: SimulatedNetwork::new(network_config, num_nodes),
            rng: ChaCha8Rng::seed_from_u64(seed),
            stats: SimulationStats::default(),
            notifications: Vec::new(),
            started: false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Get current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&NodeStateMachine> {
        self.nodes.get(index as usize)
    }

    /// Mutable access for per-node overrides before or during a run.
    pub fn node_mut(&mut self, index: NodeIndex) -> Option<&mut NodeStateMachine> {
        self.nodes.get_mut(index as usize)
    }

    pub fn nodes(&self) -> &[NodeStateMachine] {
        &self.nodes
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Network-wide view built from every mined block.
    pub fn global_chain(&self) -> &Blockchain {
        &self.global_chain
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    /// Get a mutable reference to the network for partition/loss configuration.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Take every notification recorded since the last drain.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn pending_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Time of the earliest queued event.
    pub fn next_event_time(&self) -> Option<Duration> {
        self.event_queue.first_key_value().map(|(key, _)| key.time)
    }

    fn check_node(&self, node: NodeIndex) -> Result<(), SimulationError> {
        if (node as usize) < self.nodes.len() {
            Ok(())
        } else {
            Err(SimulationError::UnknownNode {
                node,
                population: self.nodes.len(),
            })
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bootstrap
    // ═══════════════════════════════════════════════════════════════════════

    /// Put `peer` in `node`'s address book.
    pub fn add_known_peer(&mut self, node: NodeIndex, peer: NodeIndex) -> Result<(), SimulationError> {
        self.check_node(node)?;
        self.check_node(peer)?;
        if node == peer {
            return Err(SimulationError::SelfLink(node));
        }
        self.nodes[node as usize].topology_mut().add_known_peer(peer);
        Ok(())
    }

    /// Register an established connection, outgoing on `from` and incoming
    /// on `to`, without a handshake.
    pub fn link(&mut self, from: NodeIndex, to: NodeIndex) -> Result<(), SimulationError> {
        self.check_node(from)?;
        self.check_node(to)?;
        if from == to {
            return Err(SimulationError::SelfLink(from));
        }

        let allowed = self.nodes[from as usize]
            .topology()
            .can_establish(to, Direction::Outgoing)
            && self.nodes[to as usize]
                .topology()
                .can_establish(from, Direction::Incoming);
        if !allowed {
            return Err(SimulationError::LinkRefused { from, to });
        }

        let now = self.now;
        self.nodes[from as usize]
            .topology_mut()
            .establish(to, Direction::Outgoing, now);
        self.nodes[to as usize]
            .topology_mut()
            .establish(from, Direction::Incoming, now);
        self.record(
            from,
            NotificationKind::ConnectionOpened {
                peer: to,
                outgoing: true,
            },
        );
        self.record(
            to,
            NotificationKind::ConnectionOpened {
                peer: from,
                outgoing: false,
            },
        );
        debug!(from, to, "Linked nodes");
        Ok(())
    }

    /// Deliver `Start` to both protocols of every node, in node order.
    pub fn start(&mut self) {
        if self.started {
            warn!("Simulation already started");
            return;
        }
        self.started = true;

        for node in 0..self.nodes.len() as NodeIndex {
            self.schedule_event(node, self.now, GossipEvent::Start.into());
            self.schedule_event(node, self.now, TopologyEvent::Start.into());
        }
        info!(num_nodes = self.nodes.len(), "Simulation started");
    }

    /// Schedule an event for `node` after `delay`.
    pub fn schedule_initial_event(
        &mut self,
        node: NodeIndex,
        delay: Duration,
        event: impl Into<Event>,
    ) -> Result<(), SimulationError> {
        self.check_node(node)?;
        let time = self.now + delay;
        self.schedule_event(node, time, event.into());
        Ok(())
    }

    /// Create a transaction now and hand it to `node` as if a wallet had
    /// submitted it.
    pub fn submit_transaction(&mut self, node: NodeIndex) -> Result<TxId, SimulationError> {
        self.check_node(node)?;
        let tx = self.ledger.transactions.issue(self.now);
        self.schedule_event(
            node,
            self.now,
            Event::Gossip(GossipEvent::MessageReceived {
                from: None,
                message: GossipMessage::Tx { tx },
            }),
        );
        self.stats.transactions_submitted += 1;
        trace!(node, tx = %tx, "Submitted transaction");
        Ok(tx)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event Loop
    // ═══════════════════════════════════════════════════════════════════════

    /// Process the earliest event. Returns `false` if the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some((key, (node, event))) = self.event_queue.pop_first() else {
            return false;
        };
        self.dispatch(key.time, node, event);
        true
    }

    /// Run simulation until no more events or time limit reached.
    pub fn run_until(&mut self, end_time: Duration) {
        trace!(
            end_time_secs = end_time.as_secs_f64(),
            "Running simulation step"
        );

        while let Some(time) = self.next_event_time() {
            if time > end_time {
                break;
            }
            self.step();
        }

        // The clock always reaches end_time, even if the queue ran dry.
        if self.now < end_time {
            self.now = end_time;
        }

        trace!(
            events_processed = self.stats.events_processed,
            actions_generated = self.stats.actions_generated,
            final_time = ?self.now,
            "Simulation step complete"
        );
    }

    fn dispatch(&mut self, time: Duration, node: NodeIndex, event: Event) {
        self.now = time;
        self.stats.events_processed += 1;
        match event.protocol() {
            ProtocolId::Gossip => self.stats.gossip_events += 1,
            ProtocolId::Topology => self.stats.topology_events += 1,
        }
        trace!(time = ?self.now, node, event = event.type_name(), "Processing event");

        let mut ctx = HandlerContext::new(self.now, &mut self.ledger, &mut self.rng);
        let actions = self.nodes[node as usize].handle(&mut ctx, event);
        self.stats.actions_generated += actions.len() as u64;

        for action in actions {
            self.process_action(node, action);
        }
    }

    /// Process an action from a node.
    fn process_action(&mut self, from: NodeIndex, action: Action) {
        match action {
            Action::Send { to, message } => self.try_deliver(from, to, message),

            Action::SetTimer { delay, event } => {
                self.stats.timers_set += 1;
                self.schedule_event(from, self.now + delay, event);
            }

            Action::EmitBlockMined { block } => {
                self.global_chain.add_block(&self.ledger.blocks, block);
                self.record(from, NotificationKind::BlockMined { block });
            }
            Action::EmitBlockLinked { block } => {
                self.record(from, NotificationKind::BlockLinked { block });
            }
            Action::EmitReorg { old_tip, new_tip } => {
                self.record(from, NotificationKind::Reorg { old_tip, new_tip });
            }
            Action::EmitConnectionOpened { peer, outgoing } => {
                self.record(from, NotificationKind::ConnectionOpened { peer, outgoing });
            }
            Action::EmitConnectionClosed { peer } => {
                self.record(from, NotificationKind::ConnectionClosed { peer });
            }
        }
    }

    fn record(&mut self, node: NodeIndex, kind: NotificationKind) {
        self.notifications.push(Notification {
            time: self.now,
            node,
            kind,
        });
    }

    fn schedule_event(&mut self, node: NodeIndex, time: Duration, event: Event) -> EventKey {
        self.sequence += 1;
        let key = EventKey::new(time, self.sequence);
        self.event_queue.insert(key, (node, event));
        key
    }

    /// Route a message through the network, accounting for partitions,
    /// packet loss and the balance split.
    fn try_deliver(&mut self, from: NodeIndex, to: NodeIndex, message: Message) {
        match self.network.route(from, to, &message, &mut self.rng) {
            Delivery::Deliver { latency } => {
                *self
                    .stats
                    .messages_by_type
                    .entry(message.type_name())
                    .or_default() += 1;
                self.stats.messages_sent += 1;
                self.schedule_event(to, self.now + latency, Event::received(from, message));
            }
            Delivery::DroppedPartition => {
                self.stats.messages_dropped_partition += 1;
                trace!(from, to, "Message dropped due to partition");
            }
            Delivery::DroppedLoss => {
                self.stats.messages_dropped_loss += 1;
                trace!(from, to, "Message dropped due to packet loss");
            }
            Delivery::DroppedSplit => {
                self.stats.messages_dropped_split += 1;
                trace!(from, to, "Block dropped at the balance split");
            }
        }
    }
}
