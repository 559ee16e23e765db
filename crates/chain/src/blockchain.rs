//! Fork-choice engine.

use btcsim_types::{Block, BlockHeight, BlockId, BlockStore, TxId};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace};

/// Head of one candidate chain in a node's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkTip {
    /// Block with no linked child yet.
    pub tip: BlockId,

    /// Height of `tip`.
    pub height: BlockHeight,

    /// Blocks between `tip` and its common ancestor with the canonical tip.
    /// Zero for the canonical fork itself.
    pub distance: u64,
}

/// One node's view of the block tree.
///
/// Invariants:
/// - exactly one fork tip is canonical, and it has the greatest height
///   (the incumbent keeps its place on ties)
/// - a block is linked only after its parent
/// - `included` holds exactly the transactions of the canonical chain
#[derive(Debug, Clone)]
pub struct Blockchain {
    forks: Vec<ForkTip>,
    longest: usize,
    known: HashSet<BlockId>,
    included: HashSet<TxId>,
    reorgs: u64,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Create a blockchain holding only the genesis block.
    pub fn new() -> Self {
        Self {
            forks: vec![ForkTip {
                tip: BlockId::GENESIS,
                height: BlockHeight::GENESIS,
                distance: 0,
            }],
            longest: 0,
            known: HashSet::from([BlockId::GENESIS]),
            included: HashSet::new(),
            reorgs: 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Linking
    // ═══════════════════════════════════════════════════════════════════════

    /// Link a block into this view.
    ///
    /// Returns `false` without changing anything when the block's parent is
    /// unknown; the caller must fetch the parent and retry. Linking an
    /// already-known block is a no-op that returns `true`.
    pub fn add_block(&mut self, blocks: &BlockStore, id: BlockId) -> bool {
        if self.known.contains(&id) {
            return true;
        }

        let block = blocks.block(id);
        let Some(parent) = block.parent else {
            // Genesis is known from construction.
            return true;
        };
        if !self.known.contains(&parent) {
            trace!(block = %id, parent = %parent, "Parent unknown, cannot link");
            return false;
        }

        self.known.insert(id);

        match self.forks.iter().position(|fork| fork.tip == parent) {
            Some(index) => self.extend_fork(blocks, index, block),
            None => self.open_fork(blocks, block),
        }

        true
    }

    fn extend_fork(&mut self, blocks: &BlockStore, index: usize, block: &Block) {
        let fork = &mut self.forks[index];
        fork.tip = block.id;
        fork.height = block.height;

        if index == self.longest {
            self.included.extend(block.transactions.iter().copied());
            return;
        }

        if block.height > self.forks[self.longest].height {
            let old_tip = self.forks[self.longest].tip;
            self.longest = index;
            self.recompute_distances(blocks);
            self.reorganize(blocks, old_tip, block.id);
        } else {
            self.forks[index].distance += 1;
        }
    }

    fn open_fork(&mut self, blocks: &BlockStore, block: &Block) {
        let canonical = self.forks[self.longest];
        assert!(
            block.height <= canonical.height,
            "new fork at {} (height {}) would overtake canonical tip {} (height {})",
            block.id,
            block.height,
            canonical.tip,
            canonical.height,
        );

        let distance = self.distance_to(blocks, block.id, block.height, canonical.tip);
        debug!(block = %block.id, height = block.height.0, distance, "New fork");
        self.forks.push(ForkTip {
            tip: block.id,
            height: block.height,
            distance,
        });
    }

    fn recompute_distances(&mut self, blocks: &BlockStore) {
        let canonical = self.forks[self.longest].tip;
        for i in 0..self.forks.len() {
            let ForkTip { tip, height, .. } = self.forks[i];
            self.forks[i].distance = self.distance_to(blocks, tip, height, canonical);
        }
    }

    fn distance_to(
        &self,
        blocks: &BlockStore,
        tip: BlockId,
        height: BlockHeight,
        canonical: BlockId,
    ) -> u64 {
        let ancestor = blocks.common_ancestor(tip, canonical);
        height.0 - blocks.height(ancestor).0
    }

    /// Move transaction membership from the abandoned segment to the newly
    /// canonical one. Un-marking runs first so transactions present on both
    /// segments stay included.
    fn reorganize(&mut self, blocks: &BlockStore, old_tip: BlockId, new_tip: BlockId) {
        let ancestor = blocks.common_ancestor(old_tip, new_tip);

        let mut abandoned = 0u64;
        for id in blocks.ancestors(old_tip).take_while(|id| *id != ancestor) {
            abandoned += 1;
            for tx in &blocks.block(id).transactions {
                self.included.remove(tx);
            }
        }
        for id in blocks.ancestors(new_tip).take_while(|id| *id != ancestor) {
            self.included.extend(blocks.block(id).transactions.iter().copied());
        }

        self.reorgs += 1;
        debug!(
            old_tip = %old_tip,
            new_tip = %new_tip,
            ancestor = %ancestor,
            abandoned,
            "Reorganized to longer fork"
        );
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// The canonical tip.
    pub fn longest_chain(&self) -> BlockId {
        self.forks[self.longest].tip
    }

    /// Height of the canonical tip.
    pub fn height(&self) -> BlockHeight {
        self.forks[self.longest].height
    }

    pub fn has_block(&self, id: BlockId) -> bool {
        self.known.contains(&id)
    }

    /// Look up a block this node has linked.
    pub fn get_block<'s>(&self, blocks: &'s BlockStore, id: BlockId) -> Option<&'s Block> {
        if self.has_block(id) {
            blocks.get(id)
        } else {
            None
        }
    }

    /// `start` and every linked block below it, breadth first.
    ///
    /// Only children this node has linked are followed.
    pub fn descendants(&self, blocks: &BlockStore, start: BlockId) -> Vec<BlockId> {
        let mut result = Vec::new();
        if !self.has_block(start) {
            return result;
        }

        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            result.push(id);
            queue.extend(
                blocks
                    .children(id)
                    .iter()
                    .copied()
                    .filter(|child| self.has_block(*child)),
            );
        }
        result
    }

    /// Whether `tx` is included in the canonical chain.
    pub fn has_processed_transaction(&self, tx: TxId) -> bool {
        self.included.contains(&tx)
    }

    /// Deepest block that is an ancestor of both `a` and `b`.
    pub fn find_common_ancestor(&self, blocks: &BlockStore, a: BlockId, b: BlockId) -> BlockId {
        blocks.common_ancestor(a, b)
    }

    /// One entry per fork tip: its distance from the canonical tip.
    pub fn fork_distances(&self) -> Vec<u64> {
        self.forks.iter().map(|fork| fork.distance).collect()
    }

    /// All fork tips, in creation order.
    pub fn forks(&self) -> &[ForkTip] {
        &self.forks
    }

    pub fn fork_count(&self) -> usize {
        self.forks.len()
    }

    /// Number of linked blocks, genesis included.
    pub fn block_count(&self) -> usize {
        self.known.len()
    }

    /// Number of included transactions.
    pub fn processed_transaction_count(&self) -> usize {
        self.included.len()
    }

    /// Number of times the canonical tip moved to another fork.
    pub fn reorg_count(&self) -> u64 {
        self.reorgs
    }
}
