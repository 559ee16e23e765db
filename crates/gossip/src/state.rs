//! Block/transaction relay state machine.

use crate::{GossipConfig, MiningProcess};
use btcsim_chain::Blockchain;
use btcsim_core::{
    Action, GossipEvent, GossipMessage, HandlerContext, Prototype, StateMachine,
};
use btcsim_types::{BlockId, NodeIndex, TxId};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, trace};

/// Relay counters for one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GossipCounters {
    /// Distinct blocks this node forwarded to its neighbours.
    pub blocks_relayed: u64,
    /// Distinct transactions this node forwarded to its neighbours.
    pub transactions_relayed: u64,
    /// Blocks that arrived before their parent.
    pub orphans_received: u64,
    /// `GetBlocks` messages sent while chasing missing parents.
    pub get_blocks_sent: u64,
    /// Blocks served in reply to `GetData`.
    pub blocks_served: u64,
}

/// Per-node block and transaction relay protocol.
///
/// Owns the node's blockchain view and mining process. Each block and each
/// transaction is forwarded at most once, to every neighbour except the one
/// it came from.
#[derive(Debug, Clone)]
pub struct GossipProtocol {
    node: NodeIndex,
    config: GossipConfig,
    blockchain: Blockchain,
    mining: MiningProcess,

    /// Transactions this node has heard of, iterated in creation order.
    known_transactions: BTreeSet<TxId>,

    /// Orphans waiting for their parent, with the peer that sent them.
    pending_blocks: VecDeque<(BlockId, Option<NodeIndex>)>,

    relayed_blocks: HashSet<BlockId>,
    relayed_transactions: HashSet<TxId>,
    counters: GossipCounters,
}

impl GossipProtocol {
    /// Create a protocol instance for `node`.
    pub fn new(node: NodeIndex, config: GossipConfig) -> Self {
        let mining = MiningProcess::new(config.mining_mean);
        Self {
            node,
            config,
            blockchain: Blockchain::new(),
            mining,
            known_transactions: BTreeSet::new(),
            pending_blocks: VecDeque::new(),
            relayed_blocks: HashSet::new(),
            relayed_transactions: HashSet::new(),
            counters: GossipCounters::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn node(&self) -> NodeIndex {
        self.node
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn mining(&self) -> &MiningProcess {
        &self.mining
    }

    pub fn counters(&self) -> GossipCounters {
        self.counters
    }

    pub fn known_transaction_count(&self) -> usize {
        self.known_transactions.len()
    }

    /// Orphans still waiting for their parent.
    pub fn pending_block_count(&self) -> usize {
        self.pending_blocks.len()
    }

    /// Turn mining on or off. Turning it off makes any pending attempt stale.
    ///
    /// Turning it on does not start an attempt by itself; mining starts on
    /// the next `Start` event or the next finalized block.
    pub fn set_mining_enabled(&mut self, enabled: bool, now: Duration) {
        self.config.mining_enabled = enabled;
        if !enabled {
            self.mining.stop(now);
        }
    }

    /// Change the mean time between blocks for future attempts.
    pub fn set_mining_mean(&mut self, mean: Duration) {
        self.config.mining_mean = mean;
        self.mining.set_mean(mean);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mining
    // ═══════════════════════════════════════════════════════════════════════

    fn on_start(&mut self, ctx: &mut HandlerContext<'_>) -> Vec<Action> {
        if self.config.mining_enabled {
            vec![self.schedule_mining(ctx)]
        } else {
            vec![]
        }
    }

    fn schedule_mining(&mut self, ctx: &mut HandlerContext<'_>) -> Action {
        let parent = self.blockchain.longest_chain();
        let transactions = self.select_transactions();
        self.mining
            .schedule_next(ctx.now, parent, transactions, &mut *ctx.rng)
    }

    /// Earliest known transactions not yet in the canonical chain.
    fn select_transactions(&self) -> Vec<TxId> {
        self.known_transactions
            .iter()
            .copied()
            .filter(|tx| !self.blockchain.has_processed_transaction(*tx))
            .take(self.config.max_block_size)
            .collect()
    }

    fn on_block_found(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        attempt: u64,
        parent: BlockId,
        transactions: Vec<TxId>,
    ) -> Vec<Action> {
        if !self.mining.complete(attempt) {
            trace!(node = self.node, attempt, "Discarding stale mining completion");
            return vec![];
        }

        let block = ctx
            .ledger
            .blocks
            .mint(parent, transactions, ctx.now, self.node);
        debug!(
            node = self.node,
            block = %block,
            height = ctx.ledger.blocks.height(block).0,
            "Mined block"
        );

        let mut actions = vec![Action::EmitBlockMined { block }];
        self.process_block(ctx, None, block, &mut actions);
        if self.config.mining_enabled {
            actions.push(self.schedule_mining(ctx));
        }
        actions
    }

    /// Start over from the new tip if the current attempt builds on a block
    /// that is no longer the longest chain.
    fn restart_mining_if_needed(&mut self, ctx: &mut HandlerContext<'_>, actions: &mut Vec<Action>) {
        let longest = self.blockchain.longest_chain();
        match self.mining.target() {
            Some(target) if target != longest => {
                debug!(node = self.node, old = %target, new = %longest, "Restarting mining on new tip");
                actions.push(self.schedule_mining(ctx));
            }
            _ => {}
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Block Handling
    // ═══════════════════════════════════════════════════════════════════════

    /// Link `block`, or park it as an orphan and ask neighbours for its
    /// parent. On success, relay it and retry parked orphans.
    fn process_block(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        from: Option<NodeIndex>,
        block: BlockId,
        actions: &mut Vec<Action>,
    ) -> bool {
        let old_tip = self.blockchain.longest_chain();
        let reorgs = self.blockchain.reorg_count();

        if !self.link(ctx, from, block, actions) {
            self.counters.orphans_received += 1;
            if !self.pending_blocks.iter().any(|(id, _)| *id == block) {
                self.pending_blocks.push_back((block, from));
            }

            if let Some(parent) = ctx.ledger.blocks.parent(block) {
                debug!(node = self.node, block = %block, parent = %parent, "Orphan block, requesting parent");
                for &neighbor in ctx.neighbors {
                    self.counters.get_blocks_sent += 1;
                    actions.push(Action::send(
                        neighbor,
                        GossipMessage::GetBlocks {
                            headers: vec![parent],
                        },
                    ));
                }
            }
            return false;
        }

        self.drain_pending(ctx, actions);

        if self.blockchain.reorg_count() > reorgs {
            actions.push(Action::EmitReorg {
                old_tip,
                new_tip: self.blockchain.longest_chain(),
            });
        }
        true
    }

    fn link(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        from: Option<NodeIndex>,
        block: BlockId,
        actions: &mut Vec<Action>,
    ) -> bool {
        let is_new = !self.blockchain.has_block(block);
        if !self.blockchain.add_block(&ctx.ledger.blocks, block) {
            return false;
        }

        if is_new {
            trace!(node = self.node, block = %block, "Block linked");
            actions.push(Action::EmitBlockLinked { block });
        }
        self.relay_block(ctx, from, block, actions);
        true
    }

    /// Retry parked orphans in arrival order, stopping at the first one that
    /// still cannot link.
    fn drain_pending(&mut self, ctx: &mut HandlerContext<'_>, actions: &mut Vec<Action>) {
        while let Some(&(block, from)) = self.pending_blocks.front() {
            if !self.link(ctx, from, block, actions) {
                break;
            }
            self.pending_blocks.pop_front();
        }
    }

    fn relay_block(
        &mut self,
        ctx: &HandlerContext<'_>,
        from: Option<NodeIndex>,
        block: BlockId,
        actions: &mut Vec<Action>,
    ) {
        if !self.relayed_blocks.insert(block) {
            return;
        }
        self.counters.blocks_relayed += 1;
        for &neighbor in ctx.neighbors.iter().filter(|n| Some(**n) != from) {
            actions.push(Action::send(neighbor, GossipMessage::Block { block }));
        }
    }

    fn on_block(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        from: Option<NodeIndex>,
        block: BlockId,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.process_block(ctx, from, block, &mut actions) {
            self.restart_mining_if_needed(ctx, &mut actions);
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Catch-up
    // ═══════════════════════════════════════════════════════════════════════

    fn on_get_blocks(
        &mut self,
        ctx: &HandlerContext<'_>,
        peer: NodeIndex,
        headers: Vec<BlockId>,
    ) -> Vec<Action> {
        let mut seen = HashSet::new();
        let mut offered = Vec::new();
        for header in headers {
            let start = if self.blockchain.has_block(header) {
                header
            } else {
                BlockId::GENESIS
            };
            for block in self.blockchain.descendants(&ctx.ledger.blocks, start) {
                if seen.insert(block) {
                    offered.push(block);
                }
            }
        }

        trace!(node = self.node, peer, offered = offered.len(), "Answering GetBlocks");
        vec![Action::send(peer, GossipMessage::Inv { headers: offered })]
    }

    fn on_inv(&mut self, peer: NodeIndex, headers: Vec<BlockId>) -> Vec<Action> {
        let mut seen = HashSet::new();
        let wanted: Vec<BlockId> = headers
            .into_iter()
            .filter(|block| !self.blockchain.has_block(*block) && seen.insert(*block))
            .collect();

        if wanted.is_empty() {
            return vec![];
        }
        vec![Action::send(peer, GossipMessage::GetData { headers: wanted })]
    }

    fn on_get_data(&mut self, peer: NodeIndex, headers: Vec<BlockId>) -> Vec<Action> {
        headers
            .into_iter()
            .filter(|block| self.blockchain.has_block(*block))
            .map(|block| {
                self.counters.blocks_served += 1;
                Action::send(peer, GossipMessage::Block { block })
            })
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transactions
    // ═══════════════════════════════════════════════════════════════════════

    fn on_tx(
        &mut self,
        ctx: &HandlerContext<'_>,
        from: Option<NodeIndex>,
        tx: TxId,
    ) -> Vec<Action> {
        self.known_transactions.insert(tx);
        if !self.relayed_transactions.insert(tx) {
            return vec![];
        }

        self.counters.transactions_relayed += 1;
        ctx.neighbors
            .iter()
            .filter(|n| Some(**n) != from)
            .map(|&neighbor| Action::send(neighbor, GossipMessage::Tx { tx }))
            .collect()
    }
}

impl StateMachine for GossipProtocol {
    type Event = GossipEvent;

    fn handle(&mut self, ctx: &mut HandlerContext<'_>, event: GossipEvent) -> Vec<Action> {
        match event {
            GossipEvent::Start => self.on_start(ctx),
            GossipEvent::BlockFound {
                attempt,
                parent,
                transactions,
            } => self.on_block_found(ctx, attempt, parent, transactions),
            GossipEvent::MessageReceived { from, message } => match (message, from) {
                (GossipMessage::Block { block }, from) => self.on_block(ctx, from, block),
                (GossipMessage::Tx { tx }, from) => self.on_tx(ctx, from, tx),
                (GossipMessage::GetBlocks { headers }, Some(peer)) => {
                    self.on_get_blocks(ctx, peer, headers)
                }
                (GossipMessage::Inv { headers }, Some(peer)) => self.on_inv(peer, headers),
                (GossipMessage::GetData { headers }, Some(peer)) => self.on_get_data(peer, headers),
                (request, None) => {
                    trace!(node = self.node, kind = request.type_name(), "Request without sender");
                    vec![]
                }
            },
        }
    }
}

impl Prototype for GossipProtocol {
    fn clone_for(&self, node: NodeIndex) -> Self {
        Self {
            node,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btcsim_core::{Event, Message};
    use btcsim_test_helpers::{sent, timers, Harness};
    use tracing_test::traced_test;

    const ME: NodeIndex = 0;

    fn protocol() -> GossipProtocol {
        GossipProtocol::new(ME, GossipConfig::default())
    }

    fn received(from: NodeIndex, message: GossipMessage) -> GossipEvent {
        GossipEvent::MessageReceived {
            from: Some(from),
            message,
        }
    }

    fn block_found(actions: &[Action]) -> GossipEvent {
        let found: Vec<_> = timers(actions)
            .into_iter()
            .filter_map(|(_, event)| match event {
                Event::Gossip(event @ GossipEvent::BlockFound { .. }) => Some(event),
                _ => None,
            })
            .collect();
        assert_eq!(found.len(), 1, "expected exactly one BlockFound timer");
        found.into_iter().next().unwrap()
    }

    fn block_messages(actions: &[Action]) -> Vec<(NodeIndex, BlockId)> {
        sent(actions)
            .into_iter()
            .filter_map(|(to, message)| match message {
                Message::Gossip(GossipMessage::Block { block }) => Some((to, block)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_schedules_mining_only_when_enabled() {
        let mut h = Harness::new(1);
        let mut miner = protocol();
        let actions = miner.handle(&mut h.ctx(&[]), GossipEvent::Start);
        assert!(matches!(
            block_found(&actions),
            GossipEvent::BlockFound { parent: BlockId::GENESIS, .. }
        ));

        let mut relay = GossipProtocol::new(1, GossipConfig::non_mining());
        assert!(relay.handle(&mut h.ctx(&[]), GossipEvent::Start).is_empty());
    }

    #[traced_test]
    #[test]
    fn test_block_found_mints_relays_and_reschedules() {
        let mut h = Harness::new(2);
        let mut node = protocol();
        let neighbors = [1, 2];

        let found = block_found(&node.handle(&mut h.ctx(&neighbors), GossipEvent::Start));
        h.advance(Duration::from_secs(30));
        let actions = node.handle(&mut h.ctx(&neighbors), found);

        let mined = BlockId(1);
        assert_eq!(h.ledger.blocks.block(mined).miner, Some(ME));
        assert_eq!(h.ledger.blocks.block(mined).timestamp, Duration::from_secs(30));
        assert_eq!(node.blockchain().longest_chain(), mined);
        assert!(actions.contains(&Action::EmitBlockMined { block: mined }));
        assert_eq!(block_messages(&actions), vec![(1, mined), (2, mined)]);
        assert!(matches!(
            block_found(&actions),
            GossipEvent::BlockFound { parent, .. } if parent == mined
        ));
        assert_eq!(node.mining().blocks_mined(), 1);
    }

    #[traced_test]
    #[test]
    fn test_competing_block_makes_mining_attempt_stale() {
        let mut h = Harness::new(3);
        let mut node = protocol();
        let neighbors = [1];

        let stale = block_found(&node.handle(&mut h.ctx(&neighbors), GossipEvent::Start));
        h.advance(Duration::from_secs(10));
        let competing = h.mint(BlockId::GENESIS, &[], 1);
        let actions = node.handle(
            &mut h.ctx(&neighbors),
            received(1, GossipMessage::Block { block: competing }),
        );

        assert_eq!(node.blockchain().longest_chain(), competing);
        assert_eq!(node.mining().target(), Some(competing));
        assert!(matches!(
            block_found(&actions),
            GossipEvent::BlockFound { parent, .. } if parent == competing
        ));

        let blocks_before = h.ledger.blocks.len();
        assert!(node.handle(&mut h.ctx(&neighbors), stale).is_empty());
        assert_eq!(h.ledger.blocks.len(), blocks_before);
        assert_eq!(node.mining().stale_completions(), 1);
        assert_eq!(node.mining().wasted_time(), Duration::from_secs(10));
    }

    #[test]
    fn test_block_relayed_once_except_to_sender() {
        let mut h = Harness::new(4);
        let mut node = GossipProtocol::new(ME, GossipConfig::non_mining());
        let neighbors = [1, 2, 3];
        let block = h.mint(BlockId::GENESIS, &[], 9);

        let first = node.handle(
            &mut h.ctx(&neighbors),
            received(1, GossipMessage::Block { block }),
        );
        let second = node.handle(
            &mut h.ctx(&neighbors),
            received(2, GossipMessage::Block { block }),
        );

        assert_eq!(block_messages(&first), vec![(2, block), (3, block)]);
        assert!(block_messages(&second).is_empty());
        assert!(!second.contains(&Action::EmitBlockLinked { block }));
        assert_eq!(node.counters().blocks_relayed, 1);
    }

    #[traced_test]
    #[test]
    fn test_orphan_requests_parent_and_links_after_it_arrives() {
        let mut h = Harness::new(5);
        let mut node = GossipProtocol::new(ME, GossipConfig::non_mining());
        let neighbors = [1, 2];
        let parent = h.mint(BlockId::GENESIS, &[], 9);
        let child = h.mint(parent, &[], 9);

        let actions = node.handle(
            &mut h.ctx(&neighbors),
            received(1, GossipMessage::Block { block: child }),
        );
        let requests: Vec<_> = sent(&actions);
        assert_eq!(
            requests,
            vec![
                (1, Message::Gossip(GossipMessage::GetBlocks { headers: vec![parent] })),
                (2, Message::Gossip(GossipMessage::GetBlocks { headers: vec![parent] })),
            ]
        );
        assert_eq!(node.pending_block_count(), 1);
        assert!(!node.blockchain().has_block(child));

        let actions = node.handle(
            &mut h.ctx(&neighbors),
            received(2, GossipMessage::Block { block: parent }),
        );
        assert_eq!(node.blockchain().longest_chain(), child);
        assert_eq!(node.pending_block_count(), 0);
        // Parent skips its sender (2); the drained orphan skips its sender (1).
        assert_eq!(block_messages(&actions), vec![(1, parent), (2, child)]);
    }

    #[test]
    fn test_get_blocks_answers_with_descendants() {
        let mut h = Harness::new(6);
        let mut node = GossipProtocol::new(ME, GossipConfig::non_mining());
        let b1 = h.mint(BlockId::GENESIS, &[], 9);
        let b2 = h.mint(b1, &[], 9);
        for block in [b1, b2] {
            node.handle(&mut h.ctx(&[]), received(1, GossipMessage::Block { block }));
        }

        let actions = node.handle(
            &mut h.ctx(&[]),
            received(4, GossipMessage::GetBlocks { headers: vec![b1] }),
        );
        assert_eq!(
            sent(&actions),
            vec![(4, Message::Gossip(GossipMessage::Inv { headers: vec![b1, b2] }))]
        );

        let unknown = h.mint(BlockId::GENESIS, &[], 9);
        let actions = node.handle(
            &mut h.ctx(&[]),
            received(4, GossipMessage::GetBlocks { headers: vec![unknown] }),
        );
        assert_eq!(
            sent(&actions),
            vec![(
                4,
                Message::Gossip(GossipMessage::Inv {
                    headers: vec![BlockId::GENESIS, b1, b2]
                })
            )]
        );
    }

    #[test]
    fn test_inv_requests_only_unknown_blocks_and_get_data_serves_known() {
        let mut h = Harness::new(7);
        let mut node = GossipProtocol::new(ME, GossipConfig::non_mining());
        let known = h.mint(BlockId::GENESIS, &[], 9);
        let unknown = h.mint(known, &[], 9);
        node.handle(&mut h.ctx(&[]), received(1, GossipMessage::Block { block: known }));

        let actions = node.handle(
            &mut h.ctx(&[]),
            received(3, GossipMessage::Inv { headers: vec![BlockId::GENESIS, known, unknown] }),
        );
        assert_eq!(
            sent(&actions),
            vec![(3, Message::Gossip(GossipMessage::GetData { headers: vec![unknown] }))]
        );

        let nothing = node.handle(
            &mut h.ctx(&[]),
            received(3, GossipMessage::Inv { headers: vec![known] }),
        );
        assert!(nothing.is_empty());

        let actions = node.handle(
            &mut h.ctx(&[]),
            received(3, GossipMessage::GetData { headers: vec![known, unknown, BlockId::GENESIS] }),
        );
        assert_eq!(block_messages(&actions), vec![(3, known), (3, BlockId::GENESIS)]);
        assert_eq!(node.counters().blocks_served, 2);
    }

    #[test]
    fn test_transactions_relayed_once_and_selected_oldest_first() {
        let mut h = Harness::new(8);
        let mut node = GossipProtocol::new(ME, GossipConfig::default().with_max_block_size(2));
        let neighbors = [1, 2];
        let txs = h.issue_transactions(3);

        // Arrive out of order; selection still follows creation order.
        for &tx in txs.iter().rev() {
            let actions = node.handle(
                &mut h.ctx(&neighbors),
                GossipEvent::MessageReceived {
                    from: None,
                    message: GossipMessage::Tx { tx },
                },
            );
            assert_eq!(sent(&actions).len(), 2);
        }
        let again = node.handle(&mut h.ctx(&neighbors), received(1, GossipMessage::Tx { tx: txs[0] }));
        assert!(again.is_empty());
        assert_eq!(node.known_transaction_count(), 3);
        assert_eq!(node.counters().transactions_relayed, 3);

        let found = block_found(&node.handle(&mut h.ctx(&neighbors), GossipEvent::Start));
        assert!(matches!(
            &found,
            GossipEvent::BlockFound { transactions, .. } if transactions == &txs[..2]
        ));

        node.handle(&mut h.ctx(&neighbors), found);
        assert!(node.blockchain().has_processed_transaction(txs[0]));
        assert!(node.blockchain().has_processed_transaction(txs[1]));
        assert!(!node.blockchain().has_processed_transaction(txs[2]));
    }

    #[test]
    fn test_requests_without_sender_are_ignored() {
        let mut h = Harness::new(9);
        let mut node = protocol();
        let actions = node.handle(
            &mut h.ctx(&[1]),
            GossipEvent::MessageReceived {
                from: None,
                message: GossipMessage::GetBlocks { headers: vec![BlockId::GENESIS] },
            },
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_clone_for_is_independent() {
        let mut h = Harness::new(10);
        let prototype = GossipProtocol::new(ME, GossipConfig::non_mining());
        let mut a = prototype.clone_for(5);
        let b = prototype.clone_for(6);
        let block = h.mint(BlockId::GENESIS, &[], 9);

        a.handle(&mut h.ctx(&[]), received(1, GossipMessage::Block { block }));

        assert_eq!(a.node(), 5);
        assert_eq!(b.node(), 6);
        assert!(a.blockchain().has_block(block));
        assert!(!b.blockchain().has_block(block));
        assert!(!prototype.blockchain().has_block(block));
    }

    #[test]
    fn test_disabling_mining_discards_pending_attempt() {
        let mut h = Harness::new(11);
        let mut node = protocol();
        let found = block_found(&node.handle(&mut h.ctx(&[]), GossipEvent::Start));

        node.set_mining_enabled(false, h.now);
        assert!(node.handle(&mut h.ctx(&[]), found).is_empty());
        assert_eq!(h.ledger.blocks.len(), 1);
    }
}
