//! Configuration for block/transaction relay and mining.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-node relay and mining parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Mean time between blocks found by this node.
    ///
    /// Models the node's share of hash power: a network-wide block interval
    /// `T` split evenly across `n` miners gives each a mean of `n * T`.
    pub mining_mean: Duration,

    /// Maximum number of transactions in a mined block.
    pub max_block_size: usize,

    /// Whether this node mines at all.
    pub mining_enabled: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            mining_mean: Duration::from_secs(10 * 60),
            max_block_size: 20,
            mining_enabled: true,
        }
    }
}

impl GossipConfig {
    /// Set the mean time between blocks.
    pub fn with_mining_mean(mut self, mean: Duration) -> Self {
        self.mining_mean = mean;
        self
    }

    /// Set the block size limit.
    pub fn with_max_block_size(mut self, size: usize) -> Self {
        self.max_block_size = size;
        self
    }

    /// A relay-only node that never mines.
    pub fn non_mining() -> Self {
        Self {
            mining_enabled: false,
            ..Default::default()
        }
    }
}
