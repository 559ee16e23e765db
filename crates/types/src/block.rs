//! Block type.

use crate::{BlockHeight, BlockId, NodeIndex, TxId};
use std::time::Duration;

/// A mined block.
///
/// Immutable once minted. The parent is referenced by id; child references
/// are kept by the [`BlockStore`](crate::BlockStore) rather than the block,
/// so the block graph has no ownership cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Arena identifier.
    pub id: BlockId,

    /// Height in the chain (genesis = 0, otherwise parent height + 1).
    pub height: BlockHeight,

    /// Parent block; `None` only for genesis.
    pub parent: Option<BlockId>,

    /// Included transactions, in selection order.
    pub transactions: Vec<TxId>,

    /// Virtual time at which the block was mined.
    pub timestamp: Duration,

    /// Node that mined the block; `None` only for genesis.
    pub miner: Option<NodeIndex>,
}

impl Block {
    /// Create the genesis block.
    pub fn genesis() -> Self {
        Self {
            id: BlockId::GENESIS,
            height: BlockHeight::GENESIS,
            parent: None,
            transactions: Vec::new(),
            timestamp: Duration::ZERO,
            miner: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();

        assert_eq!(genesis.parent, None);
        assert_eq!(genesis.id, BlockId::GENESIS);
        assert_eq!(genesis.height, BlockHeight(0));
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.miner, None);
    }
}
