//! Simulation context lent to handlers.

use btcsim_types::{Ledger, NodeIndex};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Everything a handler may read or draw from besides its own state.
///
/// The runner builds one per dispatch step from state it owns, so the ledger
/// and the random generator are only ever accessed sequentially.
pub struct HandlerContext<'a> {
    /// Current virtual time.
    pub now: Duration,

    /// Shared block and transaction arenas.
    pub ledger: &'a mut Ledger,

    /// The run's single random generator.
    pub rng: &'a mut ChaCha8Rng,

    /// Current neighbours of the handling node, outgoing links first.
    pub neighbors: &'a [NodeIndex],
}

impl<'a> HandlerContext<'a> {
    pub fn new(now: Duration, ledger: &'a mut Ledger, rng: &'a mut ChaCha8Rng) -> Self {
        Self {
            now,
            ledger,
            rng,
            neighbors: &[],
        }
    }

    /// Attach the node's neighbour list.
    pub fn with_neighbors(mut self, neighbors: &'a [NodeIndex]) -> Self {
        self.neighbors = neighbors;
        self
    }

    /// Lend the same ledger and generator to a nested handler with a
    /// different neighbour list.
    pub fn reborrow<'b>(&'b mut self, neighbors: &'b [NodeIndex]) -> HandlerContext<'b> {
        HandlerContext {
            now: self.now,
            ledger: &mut *self.ledger,
            rng: &mut *self.rng,
            neighbors,
        }
    }
}
