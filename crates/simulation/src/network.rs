//! Simulated network with deterministic latency, packet loss, partitions and
//! an optional balance split.

use btcsim_core::Message;
use btcsim_types::NodeIndex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Two-group split that slows down and thins out block traffic between the
/// groups. Nodes with an index below `boundary` form the first group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSplit {
    pub boundary: NodeIndex,
    /// Added to the latency of every block message crossing the split.
    pub extra_delay: Duration,
    /// Probability that a block message crossing the split is dropped.
    pub drop_probability: f64,
}

impl BalanceSplit {
    /// Split a population of `num_nodes` into two halves.
    pub fn halves(num_nodes: usize, extra_delay: Duration, drop_probability: f64) -> Self {
        Self {
            boundary: (num_nodes / 2) as NodeIndex,
            extra_delay,
            drop_probability,
        }
    }

    pub fn crosses(&self, from: NodeIndex, to: NodeIndex) -> bool {
        (from < self.boundary) != (to < self.boundary)
    }
}

/// Configuration for simulated network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Base one-way latency.
    pub latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Packet loss rate (0.0 - 1.0). Messages are dropped with this probability.
    pub packet_loss_rate: f64,
    pub balance_split: Option<BalanceSplit>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(100),
            jitter_fraction: 0.5,
            packet_loss_rate: 0.0,
            balance_split: None,
        }
    }
}

impl NetworkConfig {
    pub fn with_latency(mut self, latency: Duration, jitter_fraction: f64) -> Self {
        self.latency = latency;
        self.jitter_fraction = jitter_fraction;
        self
    }

    pub fn with_packet_loss(mut self, rate: f64) -> Self {
        self.packet_loss_rate = rate;
        self
    }

    pub fn with_balance_split(mut self, split: BalanceSplit) -> Self {
        self.balance_split = Some(split);
        self
    }
}

/// Outcome of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Deliver { latency: Duration },
    DroppedPartition,
    DroppedLoss,
    DroppedSplit,
}

/// Point-to-point transport between simulated nodes.
///
/// Every message gets a latency drawn around the configured base, unless a
/// cut link, random loss or the balance split drops it first.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    num_nodes: usize,
    /// One-way cut links as `(sender, receiver)`.
    cut: HashSet<(NodeIndex, NodeIndex)>,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig, num_nodes: usize) -> Self {
        Self {
            config,
            num_nodes,
            cut: HashSet::new(),
        }
    }

    // ─── Partitions ───

    /// Whether traffic from `from` to `to` is currently cut.
    pub fn is_partitioned(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.cut.contains(&(from, to))
    }

    /// Cut traffic from `from` to `to` only. Replies still get through.
    pub fn partition_unidirectional(&mut self, from: NodeIndex, to: NodeIndex) {
        self.cut.insert((from, to));
    }

    pub fn partition_bidirectional(&mut self, a: NodeIndex, b: NodeIndex) {
        self.partition_unidirectional(a, b);
        self.partition_unidirectional(b, a);
    }

    /// Cut every link between the two groups. Links inside a group stay up.
    pub fn partition_groups(&mut self, left: &[NodeIndex], right: &[NodeIndex]) {
        for &a in left {
            for &b in right {
                self.partition_bidirectional(a, b);
            }
        }
    }

    pub fn isolate_node(&mut self, node: NodeIndex) {
        let others = (0..self.num_nodes as NodeIndex).filter(|other| *other != node);
        for other in others {
            self.partition_bidirectional(node, other);
        }
    }

    /// Restore both directions between `a` and `b`.
    pub fn heal_bidirectional(&mut self, a: NodeIndex, b: NodeIndex) {
        self.cut.remove(&(a, b));
        self.cut.remove(&(b, a));
    }

    pub fn heal_all(&mut self) {
        self.cut.clear();
    }

    /// Number of cut one-way links.
    pub fn partition_count(&self) -> usize {
        self.cut.len()
    }

    // ─── Loss and split ───

    fn is_lost(&self, rng: &mut ChaCha8Rng) -> bool {
        let rate = self.config.packet_loss_rate;
        rate > 0.0 && rng.gen::<f64>() < rate
    }

    /// Install or lift the balance split for messages routed from now on.
    pub fn set_balance_split(&mut self, split: Option<BalanceSplit>) {
        self.config.balance_split = split;
    }

    // ─── Delivery ───

    /// Decide the fate of `message` from `from` to `to`.
    ///
    /// Partitions are checked first and consume no randomness. Loss is then
    /// drawn for every message, the split draw only for block messages that
    /// cross it.
    pub fn route(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        message: &Message,
        rng: &mut ChaCha8Rng,
    ) -> Delivery {
        if self.is_partitioned(from, to) {
            return Delivery::DroppedPartition;
        }

        if self.is_lost(rng) {
            return Delivery::DroppedLoss;
        }

        let mut latency = self.sample_latency(rng);
        if let Some(split) = &self.config.balance_split {
            if message.is_block() && split.crosses(from, to) {
                if split.drop_probability > 0.0 && rng.gen::<f64>() < split.drop_probability {
                    return Delivery::DroppedSplit;
                }
                latency += split.extra_delay;
            }
        }
        Delivery::Deliver { latency }
    }

    /// Sample the one-way latency of a message.
    pub fn sample_latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let base = self.config.latency.as_secs_f64();
        let jitter_range = base * self.config.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            rng.gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        let seconds = (base + jitter).max(0.001);
        Duration::from_nanos((seconds * 1e9).round() as u64)
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}
