//! End-to-end scenarios on small hand-built networks.

use btcsim_core::GossipEvent;
use btcsim_gossip::GossipConfig;
use btcsim_node::NodeStateMachine;
use btcsim_simulation::{NetworkConfig, NotificationKind, SimulationRunner};
use btcsim_topology::{TopologyConfig, TopologyProtocol};
use btcsim_types::{BlockHeight, BlockId, NodeIndex};
use std::time::Duration;
use tracing_test::traced_test;

/// Miners whose own timers never fire within a test; blocks are injected
/// with explicit `BlockFound` events instead.
fn idle_miner() -> NodeStateMachine {
    NodeStateMachine::new(
        0,
        GossipConfig::default().with_mining_mean(Duration::from_secs(1_000_000_000)),
        TopologyConfig::default(),
    )
}

fn runner(prototype: &NodeStateMachine, num_nodes: usize, seed: u64) -> SimulationRunner {
    SimulationRunner::new(prototype, num_nodes, NetworkConfig::default(), seed)
}

fn inject_block(
    runner: &mut SimulationRunner,
    node: NodeIndex,
    at: Duration,
    attempt: u64,
    parent: BlockId,
) {
    runner
        .schedule_initial_event(
            node,
            at,
            GossipEvent::BlockFound {
                attempt,
                parent,
                transactions: Vec::new(),
            },
        )
        .unwrap();
}

#[traced_test]
#[test]
fn test_mined_block_reaches_peer() {
    let mut runner = runner(&idle_miner(), 2, 1);
    runner.link(0, 1).unwrap();
    runner.start();
    inject_block(&mut runner, 0, Duration::from_secs(1), 0, BlockId::GENESIS);

    runner.run_until(Duration::from_secs(10));

    let tip0 = runner.node(0).unwrap().longest_chain();
    let tip1 = runner.node(1).unwrap().longest_chain();
    assert_eq!(tip0, BlockId(1));
    assert_eq!(tip0, tip1, "Peers should agree on the tip");
    assert_eq!(runner.global_chain().height(), BlockHeight(1));

    let mined: Vec<_> = runner
        .notifications()
        .iter()
        .filter(|n| matches!(n.kind, NotificationKind::BlockMined { .. }))
        .map(|n| n.node)
        .collect();
    assert_eq!(mined, vec![0]);
    assert!(runner.notifications().iter().any(|n| n.node == 1
        && n.kind == NotificationKind::BlockLinked { block: BlockId(1) }));
}

#[test]
fn test_block_is_relayed_along_a_line() {
    let prototype =
        NodeStateMachine::new(0, GossipConfig::non_mining(), TopologyConfig::default());
    let mut runner = runner(&prototype, 3, 2);
    let miner = runner.node_mut(0).unwrap().gossip_mut();
    miner.set_mining_mean(Duration::from_secs(1_000_000_000));
    miner.set_mining_enabled(true, Duration::ZERO);
    runner.link(0, 1).unwrap();
    runner.link(1, 2).unwrap();
    runner.start();
    inject_block(&mut runner, 0, Duration::from_secs(1), 0, BlockId::GENESIS);

    runner.run_until(Duration::from_secs(10));

    assert_eq!(runner.stats().messages_of_type("Block"), 2);
    assert_eq!(runner.node(1).unwrap().gossip().counters().blocks_relayed, 1);
    assert!(runner.node(2).unwrap().gossip().blockchain().has_block(BlockId(1)));
}

#[traced_test]
#[test]
fn test_outgoing_connections_respect_limit() {
    let prototype = NodeStateMachine::new(
        0,
        GossipConfig::non_mining(),
        TopologyConfig::default().with_limits(2, 117),
    );
    let mut runner = runner(&prototype, 6, 3);
    for peer in 1..6 {
        runner.add_known_peer(0, peer).unwrap();
    }
    runner.start();

    let horizon = Duration::from_secs(10 * 60);
    while runner.next_event_time().is_some_and(|t| t <= horizon) {
        runner.step();
        for node in runner.nodes() {
            assert!(
                node.topology().outgoing_count() <= 2,
                "node {} exceeded its outgoing limit",
                node.index()
            );
        }
    }

    assert_eq!(runner.node(0).unwrap().topology().outgoing_count(), 2);
    let opened = runner
        .notifications()
        .iter()
        .filter(|n| {
            n.node == 0
                && matches!(
                    n.kind,
                    NotificationKind::ConnectionOpened { outgoing: true, .. }
                )
        })
        .count();
    assert!(opened >= 2);
}

#[test]
fn test_competing_blocks_resolve_to_longer_fork() {
    let mut runner = runner(&idle_miner(), 3, 4);
    runner.link(0, 1).unwrap();
    runner.link(1, 2).unwrap();
    runner.link(2, 0).unwrap();
    runner.start();

    // Nodes 0 and 1 find competing blocks at the same instant.
    inject_block(&mut runner, 0, Duration::from_secs(1), 0, BlockId::GENESIS);
    inject_block(&mut runner, 1, Duration::from_secs(1), 0, BlockId::GENESIS);
    // Node 0 then extends its own block.
    inject_block(&mut runner, 0, Duration::from_secs(5), 1, BlockId(1));

    runner.run_until(Duration::from_secs(10));

    for node in runner.nodes() {
        let chain = node.gossip().blockchain();
        assert_eq!(chain.longest_chain(), BlockId(3), "node {}", node.index());
        assert_eq!(chain.fork_count(), 2);
        let mut distances = chain.fork_distances();
        distances.sort_unstable();
        assert_eq!(distances, vec![0, 1]);
    }
    assert_eq!(runner.global_chain().fork_count(), 2);
    assert_eq!(runner.global_chain().longest_chain(), BlockId(3));
}

#[test]
fn test_prototype_overrides_apply_to_every_node() {
    let prototype = NodeStateMachine::new(
        0,
        GossipConfig::non_mining(),
        TopologyConfig::default().with_limits(3, 5),
    );
    let runner = runner(&prototype, 4, 5);
    for (index, node) in runner.nodes().iter().enumerate() {
        assert_eq!(node.index(), index as NodeIndex);
        assert_eq!(node.topology().config().max_outgoing, 3);
        assert_eq!(node.gossip().node(), index as NodeIndex);
    }
}

#[traced_test]
#[test]
fn test_eviction_closes_both_ends_of_a_link() {
    let config =
        TopologyConfig::default().with_liveness(Duration::from_secs(30), Duration::from_secs(90));
    let prototype = NodeStateMachine::new(0, GossipConfig::non_mining(), config.clone());
    let mut runner = runner(&prototype, 2, 6);
    // Node 1 only answers pings, so any eviction comes from node 0.
    *runner.node_mut(1).unwrap().topology_mut() =
        TopologyProtocol::new(1, config.clone().without_ping());
    runner.link(0, 1).unwrap();
    runner.network_mut().partition_unidirectional(1, 0);
    runner.start();

    runner.run_until(config.pong_timeout + config.ping_interval + Duration::from_secs(60));

    let node0 = runner.node(0).unwrap().topology();
    let node1 = runner.node(1).unwrap().topology();
    assert!(!node0.is_connected(1));
    assert!(!node1.is_connected(0), "evicted peer kept its end of the link");
    assert_eq!(node0.counters().evicted_for_pong_timeout, 1);
    assert_eq!(node1.counters().evicted_for_pong_timeout, 0);
    assert!(runner.stats().messages_dropped_partition > 0);

    for (node, peer) in [(0, 1), (1, 0)] {
        assert!(runner
            .notifications()
            .iter()
            .any(|n| n.node == node && n.kind == NotificationKind::ConnectionClosed { peer }));
    }
}
