//! Combined node state machine.
//!
//! This crate composes the relay and overlay protocols into one simulated
//! Bitcoin node.

mod state;

pub use state::NodeStateMachine;
