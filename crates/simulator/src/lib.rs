//! Bitcoin network simulator
//!
//! A long-running simulator built on top of the simulation framework.
//! Provides tools for studying block propagation, forks and overlay shape.
//!
//! # Architecture
//!
//! The simulator builds on `btcsim-simulation` to provide:
//!
//! - **Bootstrap**: Random address books seeded before the run starts
//! - **Workload Generation**: Transactions arriving as a Poisson process
//! - **Metrics Collection**: Propagation and confirmation latency, forks,
//!   control traffic, topology shape and wasted mining
//! - **Configuration**: Validated parameter bundles for every protocol
//!
//! # Example
//!
//! ```ignore
//! use btcsim_simulator::{Simulator, SimulatorConfig};
//! use std::time::Duration;
//!
//! let config = SimulatorConfig::new(100).with_seed(7);
//! let mut simulator = Simulator::new(config)?;
//! let report = simulator.run_for(Duration::from_secs(6 * 3600))?;
//!
//! report.print_summary();
//! ```

pub mod config;
mod error;
pub mod metrics;
pub mod runner;
pub mod workload;

pub use config::{SimulatorConfig, WorkloadConfig};
pub use error::{ConfigError, SimulatorError};
pub use metrics::{MetricsCollector, SimulationReport};
pub use runner::Simulator;
pub use workload::TransactionWorkload;
