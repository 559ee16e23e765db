//! Overlay maintenance state machine.

use crate::{Connection, Direction, TopologyConfig};
use btcsim_core::{Action, HandlerContext, Prototype, StateMachine, TopologyEvent, TopologyMessage};
use btcsim_types::NodeIndex;
use indexmap::{IndexMap, IndexSet};
use rand::seq::{index, IteratorRandom, SliceRandom};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, trace};

/// Peers per simulated `Addr` wire message.
const ADDRS_PER_MESSAGE: usize = 1000;

/// Control-message counters for one node. Each counts messages sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologyCounters {
    pub version: u64,
    pub verack: u64,
    pub getaddr: u64,
    /// `Addr` wire messages, one per started thousand addresses.
    pub addr: u64,
    pub ping: u64,
    pub pong: u64,
    pub disconnect: u64,
    /// Connections dropped because the peer stopped answering pings.
    pub evicted_for_pong_timeout: u64,
}

impl std::ops::AddAssign for TopologyCounters {
    fn add_assign(&mut self, other: Self) {
        self.version += other.version;
        self.verack += other.verack;
        self.getaddr += other.getaddr;
        self.addr += other.addr;
        self.ping += other.ping;
        self.pong += other.pong;
        self.disconnect += other.disconnect;
        self.evicted_for_pong_timeout += other.evicted_for_pong_timeout;
    }
}

/// Per-node overlay protocol.
///
/// Keeps at most one outgoing attempt in flight. Connections are kept in
/// insertion order so that neighbour lists and random selections are
/// reproducible for a given seed.
#[derive(Debug, Clone)]
pub struct TopologyProtocol {
    node: NodeIndex,
    config: TopologyConfig,

    outgoing: IndexMap<NodeIndex, Connection>,
    incoming: IndexMap<NodeIndex, Connection>,

    /// Address book.
    known_peers: IndexSet<NodeIndex>,

    /// Peer and number of the outgoing attempt in flight.
    connecting: Option<(NodeIndex, u64)>,
    next_attempt: u64,

    counters: TopologyCounters,
}

impl TopologyProtocol {
    pub fn new(node: NodeIndex, config: TopologyConfig) -> Self {
        Self {
            node,
            config,
            outgoing: IndexMap::new(),
            incoming: IndexMap::new(),
            known_peers: IndexSet::new(),
            connecting: None,
            next_attempt: 0,
            counters: TopologyCounters::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn node(&self) -> NodeIndex {
        self.node
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn counters(&self) -> TopologyCounters {
        self.counters
    }

    /// Connected peers, outgoing first, each group in connection order.
    pub fn neighbors(&self) -> Vec<NodeIndex> {
        self.outgoing
            .keys()
            .chain(self.incoming.keys())
            .copied()
            .collect()
    }

    pub fn degree(&self) -> usize {
        self.outgoing.len() + self.incoming.len()
    }

    pub fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    pub fn incoming_count(&self) -> usize {
        self.incoming.len()
    }

    pub fn is_connected(&self, peer: NodeIndex) -> bool {
        self.outgoing.contains_key(&peer) || self.incoming.contains_key(&peer)
    }

    pub fn connection(&self, peer: NodeIndex) -> Option<&Connection> {
        self.outgoing.get(&peer).or_else(|| self.incoming.get(&peer))
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.outgoing.values().chain(self.incoming.values())
    }

    /// Peer of the outgoing attempt in flight, if any.
    pub fn connecting(&self) -> Option<NodeIndex> {
        self.connecting.map(|(peer, _)| peer)
    }

    pub fn known_peers(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.known_peers.iter().copied()
    }

    pub fn known_peer_count(&self) -> usize {
        self.known_peers.len()
    }

    pub fn knows(&self, peer: NodeIndex) -> bool {
        self.known_peers.contains(&peer)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bootstrap
    // ═══════════════════════════════════════════════════════════════════════

    /// Seed the address book.
    ///
    /// # Panics
    ///
    /// Panics if the address book would exceed its cap.
    pub fn add_known_peer(&mut self, peer: NodeIndex) {
        if peer != self.node {
            self.learn_peer(peer);
        }
    }

    /// Whether a link to `peer` in `direction` can be registered right now.
    pub fn can_establish(&self, peer: NodeIndex, direction: Direction) -> bool {
        let room = match direction {
            Direction::Outgoing => self.outgoing.len() < self.config.max_outgoing,
            Direction::Incoming => self.incoming.len() < self.config.max_incoming,
        };
        room && peer != self.node && !self.is_connected(peer)
    }

    /// Register a link without a handshake. Used to pre-build topologies.
    /// Returns `false` and changes nothing if the link is not allowed.
    pub fn establish(&mut self, peer: NodeIndex, direction: Direction, now: Duration) -> bool {
        if !self.can_establish(peer, direction) {
            return false;
        }
        let connection = Connection::new(peer, direction, now);
        match direction {
            Direction::Outgoing => self.outgoing.insert(peer, connection),
            Direction::Incoming => self.incoming.insert(peer, connection),
        };
        true
    }

    fn learn_peer(&mut self, peer: NodeIndex) {
        if self.known_peers.insert(peer) {
            assert!(
                self.known_peers.len() <= self.config.max_known_peers,
                "node {} address book exceeded its cap of {} entries",
                self.node,
                self.config.max_known_peers
            );
        }
    }

    fn connection_mut(&mut self, peer: NodeIndex) -> Option<&mut Connection> {
        match self.outgoing.get_mut(&peer) {
            Some(connection) => Some(connection),
            None => self.incoming.get_mut(&peer),
        }
    }

    /// The connection at position `index` of [`Self::neighbors`].
    fn connection_at_mut(&mut self, index: usize) -> Option<&mut Connection> {
        let outgoing = self.outgoing.len();
        if index < outgoing {
            self.outgoing.get_index_mut(index).map(|(_, c)| c)
        } else {
            self.incoming.get_index_mut(index - outgoing).map(|(_, c)| c)
        }
    }

    fn remove_connection(&mut self, peer: NodeIndex) -> Option<Connection> {
        self.outgoing
            .shift_remove(&peer)
            .or_else(|| self.incoming.shift_remove(&peer))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Connect Loop
    // ═══════════════════════════════════════════════════════════════════════

    fn on_start(&mut self, ctx: &mut HandlerContext<'_>) -> Vec<Action> {
        let mut actions = vec![
            Action::timer(self.config.addr_flush_interval, TopologyEvent::FlushAddrTick),
            Action::timer(self.config.addr_queue_interval, TopologyEvent::QueueAddrTick),
        ];
        if self.config.ping_enabled {
            actions.push(Action::timer(self.config.ping_interval, TopologyEvent::PingTick));
        }
        self.connect_loop(ctx, &mut actions);
        actions
    }

    /// Start an outgoing attempt to a random known, unconnected peer unless
    /// one is already in flight or the outgoing limit is reached.
    fn connect_loop(&mut self, ctx: &mut HandlerContext<'_>, actions: &mut Vec<Action>) {
        if self.connecting.is_some() || self.outgoing.len() >= self.config.max_outgoing {
            return;
        }

        let Some(peer) = self
            .known_peers
            .iter()
            .copied()
            .filter(|peer| *peer != self.node && !self.is_connected(*peer))
            .choose(&mut *ctx.rng)
        else {
            return;
        };

        let attempt = self.next_attempt;
        self.next_attempt += 1;

        trace!(node = self.node, peer, attempt, "Connecting");
        self.connecting = Some((peer, attempt));
        self.counters.version += 1;
        actions.push(Action::send(peer, TopologyMessage::Version));
        actions.push(Action::timer(
            self.config.connect_timeout,
            TopologyEvent::ConnectTimeout { peer, attempt },
        ));
    }

    fn on_connect_timeout(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        peer: NodeIndex,
        attempt: u64,
    ) -> Vec<Action> {
        if self.connecting != Some((peer, attempt)) {
            trace!(node = self.node, peer, attempt, "Ignoring stale connect timeout");
            return vec![];
        }

        debug!(node = self.node, peer, "Connection attempt timed out");
        self.connecting = None;
        let mut actions = Vec::new();
        self.connect_loop(ctx, &mut actions);
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Handshake
    // ═══════════════════════════════════════════════════════════════════════

    fn on_version(&mut self, ctx: &mut HandlerContext<'_>, from: NodeIndex) -> Vec<Action> {
        assert_ne!(from, self.node, "node {} received its own Version", self.node);

        if !self.establish(from, Direction::Incoming, ctx.now) {
            trace!(node = self.node, peer = from, "Rejecting incoming connection");
            return vec![];
        }

        debug!(node = self.node, peer = from, "Accepted incoming connection");
        self.counters.verack += 1;
        let mut actions = vec![
            Action::send(from, TopologyMessage::VerAck),
            Action::EmitConnectionOpened {
                peer: from,
                outgoing: false,
            },
        ];

        if let Some(&target) = self.neighbors().choose(&mut *ctx.rng) {
            self.counters.addr += 1;
            actions.push(Action::send(
                target,
                TopologyMessage::Addr {
                    peers: vec![self.node],
                },
            ));
        }
        actions
    }

    fn on_verack(&mut self, ctx: &mut HandlerContext<'_>, from: NodeIndex) -> Vec<Action> {
        if self.connecting() == Some(from) {
            self.connecting = None;
        }

        let mut actions = Vec::new();
        if self.establish(from, Direction::Outgoing, ctx.now) {
            debug!(node = self.node, peer = from, "Outgoing connection established");
            self.counters.getaddr += 1;
            actions.push(Action::EmitConnectionOpened {
                peer: from,
                outgoing: true,
            });
            actions.push(Action::send(from, TopologyMessage::GetAddr));
        } else {
            trace!(node = self.node, peer = from, "Refusing late handshake");
            self.counters.disconnect += 1;
            actions.push(Action::send(from, TopologyMessage::Disconnect));
        }

        self.connect_loop(ctx, &mut actions);
        actions
    }

    fn on_disconnect(&mut self, ctx: &mut HandlerContext<'_>, from: NodeIndex) -> Vec<Action> {
        let Some(connection) = self.remove_connection(from) else {
            return vec![];
        };

        debug!(node = self.node, peer = from, "Peer closed the connection");
        let mut actions = vec![Action::EmitConnectionClosed { peer: from }];
        if connection.direction() == Direction::Outgoing {
            self.connect_loop(ctx, &mut actions);
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Address Exchange
    // ═══════════════════════════════════════════════════════════════════════

    fn on_get_addr(&mut self, ctx: &mut HandlerContext<'_>, from: NodeIndex) -> Vec<Action> {
        if !self.is_connected(from) {
            return vec![];
        }

        let mut peers: Vec<NodeIndex> = self.known_peers.iter().copied().collect();
        peers.shuffle(&mut *ctx.rng);
        let share = (peers.len() as f64 * self.config.getaddr_fraction).ceil() as usize;
        peers.truncate(share.min(self.config.getaddr_max));

        if let Some(connection) = self.connection_mut(from) {
            for &peer in &peers {
                connection.mark_announced(peer);
            }
            connection.queue_addr(peers);
        }
        vec![]
    }

    fn on_addr(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        from: NodeIndex,
        peers: Vec<NodeIndex>,
    ) -> Vec<Action> {
        for &peer in &peers {
            if peer != self.node {
                self.learn_peer(peer);
            }
        }
        trace!(node = self.node, from, count = peers.len(), "Received addresses");

        if peers.len() <= self.config.addr_gossip_threshold {
            self.regossip(&mut *ctx.rng, &peers);
        }

        let mut actions = Vec::new();
        self.connect_loop(ctx, &mut actions);
        actions
    }

    /// Queue each address to a few random connections that have not had it
    /// announced in the current window.
    fn regossip(&mut self, rng: &mut impl Rng, peers: &[NodeIndex]) {
        let degree = self.degree();
        if degree == 0 {
            return;
        }

        let fanout = self.config.addr_gossip_fanout.min(degree);
        for &address in peers {
            for position in index::sample(rng, degree, fanout) {
                let Some(connection) = self.connection_at_mut(position) else {
                    continue;
                };
                if connection.peer() != address && connection.mark_announced(address) {
                    connection.queue_addr(vec![address]);
                }
            }
        }
    }

    fn on_queue_addr_tick(&mut self) -> Vec<Action> {
        let node = self.node;
        for connection in self.outgoing.values_mut().chain(self.incoming.values_mut()) {
            connection.queue_addr(vec![node]);
        }
        vec![Action::timer(
            self.config.addr_queue_interval,
            TopologyEvent::QueueAddrTick,
        )]
    }

    /// Forget what every connection was told, then send everything queued
    /// for one randomly chosen connection.
    fn on_flush_addr_tick(&mut self, ctx: &mut HandlerContext<'_>) -> Vec<Action> {
        for connection in self.outgoing.values_mut().chain(self.incoming.values_mut()) {
            connection.clear_announced();
        }

        let mut actions = Vec::new();

        let degree = self.degree();
        if degree > 0 {
            let position = ctx.rng.gen_range(0..degree);
            let flushed = self
                .connection_at_mut(position)
                .map(|connection| (connection.peer(), connection.take_queue()));
            if let Some((peer, batches)) = flushed {
                for peers in batches.into_iter().filter(|peers| !peers.is_empty()) {
                    self.counters.addr += peers.len().div_ceil(ADDRS_PER_MESSAGE) as u64;
                    actions.push(Action::send(peer, TopologyMessage::Addr { peers }));
                }
            }
        }

        actions.push(Action::timer(
            self.config.addr_flush_interval,
            TopologyEvent::FlushAddrTick,
        ));
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Liveness
    // ═══════════════════════════════════════════════════════════════════════

    /// Evict connections that stopped answering, then ping the rest.
    fn on_ping_tick(&mut self, ctx: &mut HandlerContext<'_>) -> Vec<Action> {
        let now = ctx.now;
        let timeout = self.config.pong_timeout;
        let silent: Vec<NodeIndex> = self
            .connections()
            .filter(|connection| connection.is_silent(now, timeout))
            .map(Connection::peer)
            .collect();

        let mut actions = Vec::new();
        let mut evicted = false;
        for peer in silent {
            if self.remove_connection(peer).is_some() {
                debug!(node = self.node, peer, "Evicting silent peer");
                evicted = true;
                self.counters.evicted_for_pong_timeout += 1;
                self.counters.disconnect += 1;
                actions.push(Action::send(peer, TopologyMessage::Disconnect));
                actions.push(Action::EmitConnectionClosed { peer });
            }
        }

        for peer in self.neighbors() {
            self.counters.ping += 1;
            actions.push(Action::send(peer, TopologyMessage::Ping));
        }

        if evicted {
            self.connect_loop(ctx, &mut actions);
        }
        if self.config.ping_enabled {
            actions.push(Action::timer(self.config.ping_interval, TopologyEvent::PingTick));
        }
        actions
    }

    fn on_ping(&mut self, from: NodeIndex) -> Vec<Action> {
        if !self.is_connected(from) {
            return vec![];
        }
        self.counters.pong += 1;
        vec![Action::send(from, TopologyMessage::Pong)]
    }

    fn on_pong(&mut self, ctx: &HandlerContext<'_>, from: NodeIndex) -> Vec<Action> {
        if let Some(connection) = self.connection_mut(from) {
            connection.record_pong(ctx.now);
        }
        vec![]
    }
}

impl StateMachine for TopologyProtocol {
    type Event = TopologyEvent;

    fn handle(&mut self, ctx: &mut HandlerContext<'_>, event: TopologyEvent) -> Vec<Action> {
        match event {
            TopologyEvent::Start => self.on_start(ctx),
            TopologyEvent::FlushAddrTick => self.on_flush_addr_tick(ctx),
            TopologyEvent::QueueAddrTick => self.on_queue_addr_tick(),
            TopologyEvent::PingTick => self.on_ping_tick(ctx),
            TopologyEvent::ConnectTimeout { peer, attempt } => {
                self.on_connect_timeout(ctx, peer, attempt)
            }
            TopologyEvent::MessageReceived { from, message } => match message {
                TopologyMessage::Version => self.on_version(ctx, from),
                TopologyMessage::VerAck => self.on_verack(ctx, from),
                TopologyMessage::GetAddr => self.on_get_addr(ctx, from),
                TopologyMessage::Addr { peers } => self.on_addr(ctx, from, peers),
                TopologyMessage::Ping => self.on_ping(from),
                TopologyMessage::Pong => self.on_pong(ctx, from),
                TopologyMessage::Disconnect => self.on_disconnect(ctx, from),
            },
        }
    }
}

impl Prototype for TopologyProtocol {
    fn clone_for(&self, node: NodeIndex) -> Self {
        let mut protocol = Self {
            node,
            ..self.clone()
        };
        protocol.known_peers.shift_remove(&node);
        protocol
    }
}
