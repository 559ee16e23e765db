//! Append-only arenas for blocks and transactions.
//!
//! A [`Ledger`] is the simulation context shared by every node of one run.
//! It is owned by the runner and lent to handlers for the duration of a
//! single dispatch step, so no locking is required.

use crate::{Block, BlockHeight, BlockId, NodeIndex, Transaction, TxId};
use std::time::Duration;

/// Shared arenas for one simulation run.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub blocks: BlockStore,
    pub transactions: TransactionStore,
}

impl Ledger {
    /// Create a ledger holding only the genesis block.
    pub fn new() -> Self {
        Self::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Blocks
// ═══════════════════════════════════════════════════════════════════════════

/// Arena of every block minted during a run, indexed by [`BlockId`].
///
/// Children are recorded when a block is minted, which makes descendant
/// traversal possible without parent-to-child ownership.
#[derive(Debug, Clone)]
pub struct BlockStore {
    blocks: Vec<Block>,
    children: Vec<Vec<BlockId>>,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self {
            blocks: vec![Block::genesis()],
            children: vec![Vec::new()],
        }
    }
}

impl BlockStore {
    /// Create a store holding only the genesis block.
    pub fn new() -> Self {
        Self::default()
    }

    /// The genesis block.
    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    /// Mint a new block on top of `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` was not minted by this store.
    pub fn mint(
        &mut self,
        parent: BlockId,
        transactions: Vec<TxId>,
        timestamp: Duration,
        miner: NodeIndex,
    ) -> BlockId {
        let height = self.block(parent).height.next();
        let id = BlockId(self.blocks.len() as u32);

        self.blocks.push(Block {
            id,
            height,
            parent: Some(parent),
            transactions,
            timestamp,
            miner: Some(miner),
        });
        self.children.push(Vec::new());
        self.children[parent.index()].push(id);

        id
    }

    /// Look up a block.
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    /// Look up a block that is known to exist.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not minted by this store.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Height of a block.
    pub fn height(&self, id: BlockId) -> BlockHeight {
        self.block(id).height
    }

    /// Parent of a block (`None` for genesis).
    pub fn parent(&self, id: BlockId) -> Option<BlockId> {
        self.block(id).parent
    }

    /// Direct children of a block, in minting order.
    pub fn children(&self, id: BlockId) -> &[BlockId] {
        &self.children[id.index()]
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false: the genesis block is created with the store.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterate over all blocks in minting order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Walk from `id` up to genesis, starting with `id` itself.
    pub fn ancestors(&self, id: BlockId) -> Ancestors<'_> {
        Ancestors {
            store: self,
            next: Some(id),
        }
    }

    /// Deepest block that is an ancestor of (or equal to) both `a` and `b`.
    ///
    /// Walks the taller block up to the shorter one's height, then walks
    /// both up in lockstep until they meet.
    pub fn common_ancestor(&self, a: BlockId, b: BlockId) -> BlockId {
        let mut a = a;
        let mut b = b;

        while self.height(a) > self.height(b) {
            a = self.step_up(a);
        }
        while self.height(b) > self.height(a) {
            b = self.step_up(b);
        }
        while a != b {
            a = self.step_up(a);
            b = self.step_up(b);
        }

        a
    }

    /// Check whether `ancestor` lies on the path from `id` to genesis.
    pub fn is_ancestor(&self, ancestor: BlockId, id: BlockId) -> bool {
        let target = self.height(ancestor);
        self.ancestors(id)
            .find(|block| self.height(*block) == target)
            .is_some_and(|block| block == ancestor)
    }

    fn step_up(&self, id: BlockId) -> BlockId {
        // Only genesis lacks a parent, and genesis is the deepest common
        // ancestor of everything, so callers never step above it.
        self.parent(id).unwrap_or(BlockId::GENESIS)
    }
}

/// Iterator from a block up to genesis. See [`BlockStore::ancestors`].
pub struct Ancestors<'a> {
    store: &'a BlockStore,
    next: Option<BlockId>,
}

impl Iterator for Ancestors<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        let current = self.next?;
        self.next = self.store.parent(current);
        Some(current)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Transactions
// ═══════════════════════════════════════════════════════════════════════════

/// Global append-only transaction table.
#[derive(Debug, Clone, Default)]
pub struct TransactionStore {
    transactions: Vec<Transaction>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transaction at `timestamp` and return its id.
    pub fn issue(&mut self, timestamp: Duration) -> TxId {
        let id = TxId(self.transactions.len() as u32);
        self.transactions.push(Transaction { id, timestamp });
        id
    }

    pub fn get(&self, id: TxId) -> Option<&Transaction> {
        self.transactions.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }
}
