//! Block and transaction relay.
//!
//! [`GossipProtocol`] is the per-node "core" protocol: it owns the node's
//! [`Blockchain`](btcsim_chain::Blockchain) and [`MiningProcess`], relays new
//! blocks and transactions to neighbours at most once, and lets lagging peers
//! catch up through `GetBlocks` / `Inv` / `GetData`.
//!
//! - `GossipEvent::Start` → start mining from genesis
//! - `GossipEvent::BlockFound` → finalize the block if the attempt is current
//! - `GetBlocks` → `Inv` with everything after each requested block
//! - `Inv` → `GetData` for unknown blocks
//! - `GetData` → one `Block` per known block
//! - `Block` → link or park as orphan, relay once, restart mining if needed
//! - `Tx` → remember, relay once

mod config;
mod mining;
mod state;

pub use config::GossipConfig;
pub use mining::{MiningProcess, MiningState};
pub use state::{GossipCounters, GossipProtocol};
