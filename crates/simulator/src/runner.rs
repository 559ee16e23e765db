//! Simulator driving a population through the simulation runner.

use crate::config::SimulatorConfig;
use crate::metrics::{MetricsCollector, SimulationReport};
use crate::workload::TransactionWorkload;
use crate::SimulatorError;
use btcsim_simulation::SimulationRunner;
use btcsim_types::NodeIndex;
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tracing::info;

/// Stream id of the generator that drives bootstrap and the workload,
/// kept apart from the runner's own stream.
const SETUP_STREAM: u64 = 1;

/// Long-running simulator: bootstrap, workload and metrics around a
/// [`SimulationRunner`].
pub struct Simulator {
    config: SimulatorConfig,
    runner: SimulationRunner,
    rng: ChaCha8Rng,
    workload: Option<TransactionWorkload>,
    metrics: MetricsCollector,
    initialized: bool,
}

impl Simulator {
    /// Validate the configuration and build the population.
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        config.validate()?;

        let runner = SimulationRunner::new(
            &config.prototype(),
            config.num_nodes,
            config.network.clone(),
            config.seed,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        rng.set_stream(SETUP_STREAM);

        info!(
            num_nodes = config.num_nodes,
            bootstrap_peers = config.bootstrap_peers,
            seed = config.seed,
            "Created simulator"
        );

        Ok(Self {
            config,
            runner,
            rng,
            workload: None,
            metrics: MetricsCollector::new(),
            initialized: false,
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn runner(&self) -> &SimulationRunner {
        &self.runner
    }

    /// Mutable access for partitions, per-node overrides and manual links.
    pub fn runner_mut(&mut self) -> &mut SimulationRunner {
        &mut self.runner
    }

    /// Seed address books, start every node and arm the workload.
    ///
    /// Called by [`Simulator::run_for`] if not called explicitly.
    pub fn initialize(&mut self) -> Result<(), SimulatorError> {
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;

        let num_nodes = self.config.num_nodes;
        let peers = self.config.bootstrap_peers;
        for node in 0..num_nodes {
            // Sample among the others by skipping over `node` itself.
            for other in sample(&mut self.rng, num_nodes - 1, peers) {
                let peer = if other >= node { other + 1 } else { other };
                self.runner
                    .add_known_peer(node as NodeIndex, peer as NodeIndex)?;
            }
        }

        self.runner.start();

        self.workload = self.config.workload.tx_interval.map(|interval| {
            TransactionWorkload::new(interval, num_nodes, self.runner.now(), &mut self.rng)
        });

        info!(bootstrap_peers = peers, "Simulator initialized");
        Ok(())
    }

    /// Run for `duration` of simulated time and report on the whole run so
    /// far.
    pub fn run_for(&mut self, duration: Duration) -> Result<SimulationReport, SimulatorError> {
        self.initialize()?;
        let end = self.runner.now() + duration;

        while let Some(arrival) = self
            .workload
            .as_ref()
            .map(TransactionWorkload::next_arrival)
            .filter(|arrival| *arrival <= end)
        {
            self.runner.run_until(arrival);
            if let Some(workload) = self.workload.as_mut() {
                let node = workload.take_arrival(&mut self.rng);
                self.runner.submit_transaction(node)?;
            }
            self.collect();
        }
        self.runner.run_until(end);
        self.collect();

        let report = self.metrics.report(&self.runner);
        info!(
            simulated_secs = self.runner.now().as_secs_f64(),
            events = self.runner.stats().events_processed,
            height = report.chain_height.0,
            blocks_mined = report.blocks_mined,
            transactions = report.transactions_submitted,
            "Simulation complete"
        );
        Ok(report)
    }

    fn collect(&mut self) {
        let notifications = self.runner.drain_notifications();
        self.metrics
            .observe(&notifications, &self.runner.ledger().blocks);
    }
}
