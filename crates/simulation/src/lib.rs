//! Deterministic simulation runner.
//!
//! This crate provides a fully deterministic discrete-event environment for
//! simulating a Bitcoin P2P network. Given the same seed and configuration,
//! it produces identical results every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationRunner                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  Event Queue (BTreeMap<EventKey, (node, Event)>)   │ │
//! │  │  Ordered by: time, sequence                        │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  nodes: Vec<NodeStateMachine>                      │ │
//! │  │  handle(ctx { now, &mut Ledger, &mut rng }, event) │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  Actions → SimulatedNetwork / timers / log         │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod error;
mod event_queue;
mod network;
mod runner;

pub use error::SimulationError;
pub use event_queue::EventKey;
pub use network::{BalanceSplit, Delivery, NetworkConfig, SimulatedNetwork};
pub use runner::{Notification, NotificationKind, SimulationRunner, SimulationStats};
