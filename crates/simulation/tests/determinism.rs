//! Tests for deterministic simulation.
//!
//! The same seed must reproduce a run exactly: every event, every message and
//! every notification.

use btcsim_gossip::GossipConfig;
use btcsim_node::NodeStateMachine;
use btcsim_simulation::{NetworkConfig, Notification, SimulationRunner, SimulationStats};
use btcsim_topology::TopologyConfig;
use btcsim_types::{BlockId, NodeIndex};
use std::time::Duration;
use tracing_test::traced_test;

const NUM_NODES: usize = 8;

/// Fast-mining prototype so a short run produces forks and relays.
fn prototype() -> NodeStateMachine {
    NodeStateMachine::new(
        0,
        GossipConfig::default().with_mining_mean(Duration::from_secs(40)),
        TopologyConfig::default().with_limits(3, 8),
    )
}

/// Bootstrap a ring of known peers, start, submit a few transactions and run
/// for two simulated minutes.
fn run(seed: u64) -> (SimulationStats, Vec<Notification>, Vec<BlockId>) {
    let mut runner =
        SimulationRunner::new(&prototype(), NUM_NODES, NetworkConfig::default(), seed);
    for node in 0..NUM_NODES as NodeIndex {
        let next = (node + 1) % NUM_NODES as NodeIndex;
        runner.add_known_peer(node, next).unwrap();
    }
    runner.start();

    for i in 0..5 {
        runner.run_until(Duration::from_secs(i * 10));
        runner.submit_transaction(i as NodeIndex).unwrap();
    }
    runner.run_until(Duration::from_secs(120));

    let tips = runner.nodes().iter().map(|n| n.longest_chain()).collect();
    (runner.stats().clone(), runner.drain_notifications(), tips)
}

/// Test that the same seed produces the same run.
#[traced_test]
#[test]
fn test_determinism_same_seed() {
    let (stats1, notifications1, tips1) = run(12345);
    let (stats2, notifications2, tips2) = run(12345);

    assert!(stats1.events_processed > 0);
    assert_eq!(
        stats1.events_processed, stats2.events_processed,
        "Same seed should produce same number of events"
    );
    assert_eq!(stats1, stats2, "Same seed should produce same statistics");
    assert_eq!(
        notifications1, notifications2,
        "Same seed should produce same notifications"
    );
    assert_eq!(tips1, tips2, "Same seed should produce same tips");
}

/// Test that different seeds produce different runs.
#[test]
fn test_different_seeds_diverge() {
    let (stats1, notifications1, _) = run(1);
    let (stats2, notifications2, _) = run(2);

    assert!(
        stats1 != stats2 || notifications1 != notifications2,
        "Different seeds should produce different runs"
    );
}
