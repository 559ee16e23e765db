//! Test helpers for the simulator crates.
//!
//! - Ledger fixtures for building block trees without running a simulation
//! - A [`Harness`] that owns a ledger, a seeded RNG and a clock, and lends
//!   them to protocol handlers the way the runner does
//! - Small extractors for inspecting the actions a handler returned

use btcsim_core::{Action, Event, HandlerContext, Message};
use btcsim_types::{BlockId, BlockStore, Ledger, NodeIndex, TxId};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════
// Ledger Fixtures
// ═══════════════════════════════════════════════════════════════════════════

/// Mint `len` empty blocks on top of `parent`, returning them in chain order.
pub fn mint_chain(store: &mut BlockStore, parent: BlockId, len: usize) -> Vec<BlockId> {
    let mut tip = parent;
    (0..len)
        .map(|_| {
            tip = store.mint(tip, Vec::new(), Duration::ZERO, 0);
            tip
        })
        .collect()
}

/// Mint one block carrying `transactions`.
pub fn mint_with(store: &mut BlockStore, parent: BlockId, transactions: &[TxId]) -> BlockId {
    store.mint(parent, transactions.to_vec(), Duration::ZERO, 0)
}

// ═══════════════════════════════════════════════════════════════════════════
// Handler Harness
// ═══════════════════════════════════════════════════════════════════════════

/// Owns what the runner would normally lend to a handler.
pub struct Harness {
    pub ledger: Ledger,
    pub rng: ChaCha8Rng,
    pub now: Duration,
}

impl Harness {
    pub fn new(seed: u64) -> Self {
        Self {
            ledger: Ledger::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            now: Duration::ZERO,
        }
    }

    /// Build a handler context with the given neighbour list.
    pub fn ctx<'a>(&'a mut self, neighbors: &'a [NodeIndex]) -> HandlerContext<'a> {
        HandlerContext::new(self.now, &mut self.ledger, &mut self.rng).with_neighbors(neighbors)
    }

    /// Move the clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Mint a block in the harness ledger.
    pub fn mint(&mut self, parent: BlockId, transactions: &[TxId], miner: NodeIndex) -> BlockId {
        self.ledger
            .blocks
            .mint(parent, transactions.to_vec(), self.now, miner)
    }

    /// Create `n` transactions at the current time.
    pub fn issue_transactions(&mut self, n: usize) -> Vec<TxId> {
        (0..n)
            .map(|_| self.ledger.transactions.issue(self.now))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Action Extractors
// ═══════════════════════════════════════════════════════════════════════════

/// All `Send` actions as `(to, message)` pairs, in order.
pub fn sent(actions: &[Action]) -> Vec<(NodeIndex, Message)> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::Send { to, message } => Some((*to, message.clone())),
            _ => None,
        })
        .collect()
}

/// All `SetTimer` actions as `(delay, event)` pairs, in order.
pub fn timers(actions: &[Action]) -> Vec<(Duration, Event)> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::SetTimer { delay, event } => Some((*delay, event.clone())),
            _ => None,
        })
        .collect()
}
