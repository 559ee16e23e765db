//! Bitcoin network simulator CLI
//!
//! Run deterministic simulations of block and address propagation.
//!
//! # Example
//!
//! ```bash
//! # A day of a 200-node network with a fixed seed
//! btcsim --seed 42 -n 200 -d 86400
//!
//! # Fast blocks, lossy links, no liveness pings
//! btcsim -n 50 --mining-mean-secs 600 --packet-loss 0.05 --no-ping
//! ```

use btcsim_gossip::GossipConfig;
use btcsim_simulation::NetworkConfig;
use btcsim_simulator::{Simulator, SimulatorConfig, WorkloadConfig};
use btcsim_topology::TopologyConfig;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Bitcoin network simulator
///
/// Runs deterministic discrete-event simulations. Single-threaded,
/// reproducible when the same seed is used.
#[derive(Parser, Debug)]
#[command(name = "btcsim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of nodes
    #[arg(short = 'n', long, default_value = "100")]
    nodes: usize,

    /// Simulated duration in seconds
    #[arg(short = 'd', long, default_value = "21600")]
    duration_secs: u64,

    /// Random seed for reproducible results. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// Mean time between blocks found by one node, in seconds.
    /// Defaults to ten minutes times the number of nodes.
    #[arg(long)]
    mining_mean_secs: Option<u64>,

    /// Maximum transactions per block
    #[arg(long, default_value = "20")]
    block_size: usize,

    /// Outgoing connection limit per node
    #[arg(long, default_value = "8")]
    max_outgoing: usize,

    /// Incoming connection limit per node
    #[arg(long, default_value = "117")]
    max_incoming: usize,

    /// Random addresses seeded into each node's address book
    #[arg(long, default_value = "8")]
    bootstrap_peers: usize,

    /// Base one-way latency in milliseconds
    #[arg(long, default_value = "100")]
    latency_ms: u64,

    /// Packet loss rate (0.0-1.0)
    #[arg(long, default_value = "0.0")]
    packet_loss: f64,

    /// Mean time between transactions in milliseconds; 0 disables the workload
    #[arg(long, default_value = "1000")]
    tx_interval_ms: u64,

    /// Disable ping/pong liveness checks
    #[arg(long)]
    no_ping: bool,
}

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,btcsim_simulator=info,btcsim=info")),
        )
        .init();

    let args = Args::parse();
    let seed = args.seed.unwrap_or_else(rand::random);

    let defaults = SimulatorConfig::new(args.nodes);
    let mining_mean = args
        .mining_mean_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults.gossip.mining_mean);

    let mut topology = TopologyConfig::default().with_limits(args.max_outgoing, args.max_incoming);
    if args.no_ping {
        topology = topology.without_ping();
    }

    let workload = match args.tx_interval_ms {
        0 => WorkloadConfig::disabled(),
        ms => WorkloadConfig::default().with_tx_interval(Duration::from_millis(ms)),
    };

    let jitter = NetworkConfig::default().jitter_fraction;
    let config = defaults
        .with_gossip(
            GossipConfig::default()
                .with_mining_mean(mining_mean)
                .with_max_block_size(args.block_size),
        )
        .with_topology(topology)
        .with_network(
            NetworkConfig::default()
                .with_latency(Duration::from_millis(args.latency_ms), jitter)
                .with_packet_loss(args.packet_loss),
        )
        .with_workload(workload)
        .with_bootstrap_peers(args.bootstrap_peers)
        .with_seed(seed);

    info!(
        nodes = args.nodes,
        duration_secs = args.duration_secs,
        seed,
        mining_mean_secs = mining_mean.as_secs(),
        "Starting simulation"
    );

    let mut simulator = match Simulator::new(config) {
        Ok(simulator) => simulator,
        Err(e) => {
            error!(error = %e, "Failed to create simulator");
            return ExitCode::FAILURE;
        }
    };

    match simulator.run_for(Duration::from_secs(args.duration_secs)) {
        Ok(report) => {
            report.print_summary();
            println!("\nSeed: {seed}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Simulation failed");
            ExitCode::FAILURE
        }
    }
}
