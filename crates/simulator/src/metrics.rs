//! Metrics collection and the end-of-run report.
//!
//! The collector consumes runner notifications as the run progresses, then
//! reads the remaining figures from node and runner state when the report is
//! built. Latencies are kept in `hdrhistogram` histograms in milliseconds.

use btcsim_simulation::{Notification, NotificationKind, SimulationRunner, SimulationStats};
use btcsim_topology::TopologyCounters;
use btcsim_types::{BlockHeight, BlockId, BlockStore, TransactionStore};
use hdrhistogram::Histogram;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

fn new_histogram() -> Histogram<u64> {
    Histogram::new(3).expect("histogram creation should succeed")
}

/// Accumulates per-event metrics during a run.
pub struct MetricsCollector {
    /// Time from a block's creation to its first link at each other node.
    propagation: Histogram<u64>,
    blocks_mined: u64,
    reorgs: u64,
    connections_opened: u64,
    connections_closed: u64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            propagation: new_histogram(),
            blocks_mined: 0,
            reorgs: 0,
            connections_opened: 0,
            connections_closed: 0,
        }
    }

    /// Fold a batch of notifications into the running totals.
    pub fn observe(&mut self, notifications: &[Notification], blocks: &BlockStore) {
        for notification in notifications {
            match notification.kind {
                NotificationKind::BlockMined { .. } => self.blocks_mined += 1,
                NotificationKind::BlockLinked { block } => {
                    let block = blocks.block(block);
                    if block.miner != Some(notification.node) {
                        let delay = notification.time.saturating_sub(block.timestamp);
                        let _ = self.propagation.record(delay.as_millis() as u64);
                    }
                }
                NotificationKind::Reorg { .. } => self.reorgs += 1,
                NotificationKind::ConnectionOpened { .. } => self.connections_opened += 1,
                NotificationKind::ConnectionClosed { .. } => self.connections_closed += 1,
            }
        }
    }

    /// Build the report from the totals so far and the runner's final state.
    pub fn report(&self, runner: &SimulationRunner) -> SimulationReport {
        let ledger = runner.ledger();
        let global = runner.global_chain();

        let mut fork_distances = BTreeMap::new();
        let mut control = TopologyCounters::default();
        let mut outgoing = new_histogram();
        let mut incoming = new_histogram();
        let mut known_peers = new_histogram();
        let mut wasted_mining = Duration::ZERO;
        let mut stale_completions = 0;
        let mut orphans_received = 0;

        for node in runner.nodes() {
            for distance in node.fork_distances() {
                *fork_distances.entry(distance).or_insert(0u64) += 1;
            }

            let topology = node.topology();
            control += topology.counters();
            let _ = outgoing.record(topology.outgoing_count() as u64);
            let _ = incoming.record(topology.incoming_count() as u64);
            let _ = known_peers.record(topology.known_peer_count() as u64);

            let gossip = node.gossip();
            wasted_mining += gossip.mining().wasted_time();
            stale_completions += gossip.mining().stale_completions();
            orphans_received += gossip.counters().orphans_received;
        }

        let (confirmation, transactions_confirmed) =
            confirmation_latency(&ledger.blocks, &ledger.transactions, global.longest_chain());

        SimulationReport {
            duration: runner.now(),
            num_nodes: runner.num_nodes(),
            blocks_mined: self.blocks_mined,
            chain_height: global.height(),
            global_fork_distances: global.fork_distances(),
            fork_distances,
            reorgs: self.reorgs,
            transactions_submitted: runner.stats().transactions_submitted,
            transactions_confirmed,
            confirmation,
            propagation: self.propagation.clone(),
            control,
            connections_opened: self.connections_opened,
            connections_closed: self.connections_closed,
            outgoing,
            incoming,
            known_peers,
            wasted_mining,
            stale_completions,
            orphans_received,
            transport: runner.stats().clone(),
        }
    }
}

/// Latency from creation to first inclusion on the chain ending at `tip`.
fn confirmation_latency(
    blocks: &BlockStore,
    transactions: &TransactionStore,
    tip: BlockId,
) -> (Histogram<u64>, u64) {
    let mut histogram = new_histogram();
    let mut seen = HashSet::new();

    let mut chain: Vec<_> = blocks.ancestors(tip).collect();
    chain.reverse();
    for id in chain {
        let block = blocks.block(id);
        for tx in &block.transactions {
            if !seen.insert(*tx) {
                continue;
            }
            if let Some(tx) = transactions.get(*tx) {
                let latency = block.timestamp.saturating_sub(tx.timestamp);
                let _ = histogram.record(latency.as_millis() as u64);
            }
        }
    }
    (histogram, seen.len() as u64)
}

/// Everything measured over one run.
pub struct SimulationReport {
    /// Simulated time covered.
    pub duration: Duration,
    pub num_nodes: usize,

    pub blocks_mined: u64,
    /// Height of the network-wide longest chain.
    pub chain_height: BlockHeight,
    /// Fork distances in the network-wide view, canonical fork first.
    pub global_fork_distances: Vec<u64>,
    /// Fork tips across every node's view, keyed by distance.
    pub fork_distances: BTreeMap<u64, u64>,
    /// Tip changes observed across all nodes.
    pub reorgs: u64,

    pub transactions_submitted: u64,
    /// Transactions on the network-wide longest chain.
    pub transactions_confirmed: u64,
    confirmation: Histogram<u64>,
    propagation: Histogram<u64>,

    /// Control messages summed over every node.
    pub control: TopologyCounters,
    pub connections_opened: u64,
    pub connections_closed: u64,
    outgoing: Histogram<u64>,
    incoming: Histogram<u64>,
    known_peers: Histogram<u64>,

    /// Time spent on mining attempts that a new tip superseded.
    pub wasted_mining: Duration,
    pub stale_completions: u64,
    pub orphans_received: u64,

    pub transport: SimulationStats,
}

impl SimulationReport {
    /// Mean time between blocks on the longest chain.
    pub fn average_block_interval(&self) -> Option<Duration> {
        (self.chain_height.0 > 0).then(|| self.duration / self.chain_height.0 as u32)
    }

    /// Forks other than the canonical one in the network-wide view.
    pub fn abandoned_forks(&self) -> usize {
        self.global_fork_distances.len().saturating_sub(1)
    }

    pub fn confirmation_p50(&self) -> Duration {
        Duration::from_millis(self.confirmation.value_at_quantile(0.50))
    }

    pub fn confirmation_p99(&self) -> Duration {
        Duration::from_millis(self.confirmation.value_at_quantile(0.99))
    }

    pub fn propagation_p50(&self) -> Duration {
        Duration::from_millis(self.propagation.value_at_quantile(0.50))
    }

    pub fn propagation_p99(&self) -> Duration {
        Duration::from_millis(self.propagation.value_at_quantile(0.99))
    }

    pub fn propagation_max(&self) -> Duration {
        Duration::from_millis(self.propagation.max())
    }

    /// Number of block arrivals measured.
    pub fn propagation_samples(&self) -> u64 {
        self.propagation.len()
    }

    /// Mean number of outgoing connections per node.
    pub fn mean_outgoing(&self) -> f64 {
        self.outgoing.mean()
    }

    pub fn max_outgoing(&self) -> u64 {
        self.outgoing.max()
    }

    pub fn mean_incoming(&self) -> f64 {
        self.incoming.mean()
    }

    pub fn max_incoming(&self) -> u64 {
        self.incoming.max()
    }

    pub fn mean_known_peers(&self) -> f64 {
        self.known_peers.mean()
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== Simulation Report ===");
        println!(
            "Simulated {:.1}s with {} nodes",
            self.duration.as_secs_f64(),
            self.num_nodes
        );

        println!("\nChain:");
        println!("  Blocks mined: {}", self.blocks_mined);
        println!("  Longest chain height: {}", self.chain_height);
        match self.average_block_interval() {
            Some(interval) => println!("  Average block interval: {:.1}s", interval.as_secs_f64()),
            None => println!("  Average block interval: n/a"),
        }
        println!("  Abandoned forks: {}", self.abandoned_forks());
        println!("  Reorgs observed by nodes: {}", self.reorgs);
        for (distance, count) in &self.fork_distances {
            println!("  Fork tips at distance {distance}: {count}");
        }

        println!("\nTransactions:");
        println!("  Submitted: {}", self.transactions_submitted);
        println!("  Confirmed: {}", self.transactions_confirmed);
        if !self.confirmation.is_empty() {
            println!(
                "  Confirmation latency p50/p99: {:.1}s / {:.1}s",
                self.confirmation_p50().as_secs_f64(),
                self.confirmation_p99().as_secs_f64()
            );
        }

        println!("\nPropagation:");
        if self.propagation.is_empty() {
            println!("  No blocks propagated");
        } else {
            println!(
                "  Block arrival p50/p99/max: {}ms / {}ms / {}ms ({} samples)",
                self.propagation_p50().as_millis(),
                self.propagation_p99().as_millis(),
                self.propagation_max().as_millis(),
                self.propagation_samples()
            );
        }

        println!("\nTopology:");
        println!(
            "  Outgoing mean/max: {:.2} / {}",
            self.mean_outgoing(),
            self.max_outgoing()
        );
        println!(
            "  Incoming mean/max: {:.2} / {}",
            self.mean_incoming(),
            self.max_incoming()
        );
        println!("  Known peers mean: {:.1}", self.mean_known_peers());
        println!(
            "  Connections opened/closed: {} / {}",
            self.connections_opened, self.connections_closed
        );
        println!(
            "  Messages: version {}, verack {}, getaddr {}, addr {}, ping {}, pong {}",
            self.control.version,
            self.control.verack,
            self.control.getaddr,
            self.control.addr,
            self.control.ping,
            self.control.pong
        );
        println!(
            "  Evicted for pong timeout: {}",
            self.control.evicted_for_pong_timeout
        );

        println!("\nMining:");
        println!(
            "  Wasted mining time: {:.1}s",
            self.wasted_mining.as_secs_f64()
        );
        println!("  Stale completions: {}", self.stale_completions);
        println!("  Orphans received: {}", self.orphans_received);

        println!("\nTransport:");
        println!("  Messages delivered: {}", self.transport.messages_sent);
        println!(
            "  Dropped (partition/loss/split): {} / {} / {}",
            self.transport.messages_dropped_partition,
            self.transport.messages_dropped_loss,
            self.transport.messages_dropped_split
        );
        println!(
            "  Delivery rate: {:.2}%",
            self.transport.delivery_rate() * 100.0
        );
    }
}
