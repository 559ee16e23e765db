//! Configuration types for the simulator.

use crate::ConfigError;
use btcsim_gossip::GossipConfig;
use btcsim_node::NodeStateMachine;
use btcsim_simulation::NetworkConfig;
use btcsim_topology::TopologyConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a simulation run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Number of nodes in the network.
    pub num_nodes: usize,

    /// Relay and mining parameters shared by every node.
    pub gossip: GossipConfig,

    /// Overlay parameters shared by every node.
    pub topology: TopologyConfig,

    pub network: NetworkConfig,

    /// Workload configuration.
    pub workload: WorkloadConfig,

    /// Distinct random peers put in each node's address book before start.
    pub bootstrap_peers: usize,

    /// Random seed for deterministic simulation.
    pub seed: u64,
}

impl SimulatorConfig {
    /// Create a new simulator configuration.
    ///
    /// The network-wide block interval stays at the gossip default: each
    /// node's mining mean is scaled by the population so that `num_nodes`
    /// equal miners together find a block every ten minutes.
    pub fn new(num_nodes: usize) -> Self {
        let interval = GossipConfig::default().mining_mean;
        Self {
            num_nodes,
            gossip: GossipConfig::default()
                .with_mining_mean(interval * num_nodes.max(1) as u32),
            topology: TopologyConfig::default(),
            network: NetworkConfig::default(),
            workload: WorkloadConfig::default(),
            bootstrap_peers: 8.min(num_nodes.saturating_sub(1)),
            seed: 12345,
        }
    }

    pub fn with_gossip(mut self, gossip: GossipConfig) -> Self {
        self.gossip = gossip;
        self
    }

    pub fn with_topology(mut self, topology: TopologyConfig) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Set the workload configuration.
    pub fn with_workload(mut self, workload: WorkloadConfig) -> Self {
        self.workload = workload;
        self
    }

    pub fn with_bootstrap_peers(mut self, peers: usize) -> Self {
        self.bootstrap_peers = peers;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check that the parameters describe a runnable network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_nodes == 0 {
            return Err(ConfigError::NoNodes);
        }
        if self.gossip.mining_mean.is_zero() {
            return Err(ConfigError::ZeroMiningMean);
        }
        if self.gossip.max_block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.topology.max_outgoing == 0 {
            return Err(ConfigError::ZeroOutgoing);
        }

        let rates = [
            ("Packet loss rate", self.network.packet_loss_rate),
            ("Jitter fraction", self.network.jitter_fraction),
            ("GetAddr fraction", self.topology.getaddr_fraction),
        ];
        let split_rate = self
            .network
            .balance_split
            .as_ref()
            .map(|split| ("Split drop probability", split.drop_probability));
        for (name, value) in rates.into_iter().chain(split_rate) {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::RateOutOfRange { name, value });
            }
        }

        if self.workload.tx_interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::ZeroTransactionInterval);
        }

        if self.bootstrap_peers > self.num_nodes - 1 {
            return Err(ConfigError::TooManyBootstrapPeers {
                requested: self.bootstrap_peers,
                population: self.num_nodes,
            });
        }
        if self.bootstrap_peers > self.topology.max_known_peers {
            return Err(ConfigError::BootstrapExceedsAddressBook {
                requested: self.bootstrap_peers,
                cap: self.topology.max_known_peers,
            });
        }
        Ok(())
    }

    /// The node every member of the population is cloned from.
    pub fn prototype(&self) -> NodeStateMachine {
        NodeStateMachine::new(0, self.gossip.clone(), self.topology.clone())
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::new(32)
    }
}

/// Workload configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Mean time between transactions entering the network. `None` turns
    /// the workload off.
    pub tx_interval: Option<Duration>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            tx_interval: Some(Duration::from_secs(1)),
        }
    }
}

impl WorkloadConfig {
    /// A workload that never submits transactions.
    pub fn disabled() -> Self {
        Self { tx_interval: None }
    }

    /// Set the mean transaction inter-arrival time.
    pub fn with_tx_interval(mut self, interval: Duration) -> Self {
        self.tx_interval = Some(interval);
        self
    }
}
