//! Overlay construction and maintenance.
//!
//! [`TopologyProtocol`] builds and repairs one node's slice of the P2P
//! overlay:
//!
//! - **Connect loop**: one outgoing attempt at a time (`Version` →
//!   `VerAck`) until the outgoing limit is reached, retried on timeout
//! - **Address exchange**: `GetAddr` after each new outgoing link, a long
//!   periodic self-announcement, a short periodic flush of one connection's
//!   queued announcements, and re-gossip of small `Addr` lists
//! - **Liveness**: periodic `Ping`; links silent for longer than the pong
//!   timeout are dropped on both ends with `Disconnect`

mod config;
mod connection;
mod state;

pub use config::TopologyConfig;
pub use connection::{Connection, Direction};
pub use state::{TopologyCounters, TopologyProtocol};
