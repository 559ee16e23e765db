//! Simulator errors.

use btcsim_simulation::SimulationError;
use thiserror::Error;

/// A parameter combination the simulator refuses to run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Network must have at least one node")]
    NoNodes,

    #[error("Mining mean must be positive")]
    ZeroMiningMean,

    #[error("Block size limit must be positive")]
    ZeroBlockSize,

    #[error("Outgoing connection limit must be positive")]
    ZeroOutgoing,

    #[error("{name} must be within [0, 1], got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },

    #[error("Transaction interval must be positive")]
    ZeroTransactionInterval,

    #[error("Cannot bootstrap {requested} peers in a population of {population}")]
    TooManyBootstrapPeers { requested: usize, population: usize },

    #[error("Cannot bootstrap {requested} peers into an address book of {cap}")]
    BootstrapExceedsAddressBook { requested: usize, cap: usize },
}

/// Errors from building or driving a [`crate::Simulator`].
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Simulation setup failed: {0}")]
    Simulation(#[from] SimulationError),
}
