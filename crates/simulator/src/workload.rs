//! Transaction workload.
//!
//! Transactions enter the network as a Poisson process: inter-arrival times
//! are exponential and each transaction goes to a uniformly random node.

use btcsim_types::NodeIndex;
use rand::Rng;
use rand_distr::Exp1;
use std::time::Duration;

/// Generates transaction arrivals.
#[derive(Debug, Clone)]
pub struct TransactionWorkload {
    mean_interval: Duration,
    num_nodes: usize,
    next_arrival: Duration,
    generated: u64,
}

impl TransactionWorkload {
    /// Create a workload whose first arrival is drawn from `start`.
    pub fn new(
        mean_interval: Duration,
        num_nodes: usize,
        start: Duration,
        rng: &mut impl Rng,
    ) -> Self {
        let mut workload = Self {
            mean_interval,
            num_nodes,
            next_arrival: start,
            generated: 0,
        };
        workload.next_arrival = start + workload.sample_interval(rng);
        workload
    }

    /// Time of the next arrival.
    pub fn next_arrival(&self) -> Duration {
        self.next_arrival
    }

    /// Emit the pending arrival: returns the node it targets and draws the
    /// one after it.
    pub fn take_arrival(&mut self, rng: &mut impl Rng) -> NodeIndex {
        let node = rng.gen_range(0..self.num_nodes) as NodeIndex;
        self.next_arrival += self.sample_interval(rng);
        self.generated += 1;
        node
    }

    /// Number of arrivals emitted so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }

    pub fn mean_interval(&self) -> Duration {
        self.mean_interval
    }

    fn sample_interval(&self, rng: &mut impl Rng) -> Duration {
        let draw: f64 = rng.sample(Exp1);
        let nanos = (draw * self.mean_interval.as_nanos() as f64).round() as u64;
        Duration::from_nanos(nanos.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_arrivals_are_ordered_and_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut workload =
            TransactionWorkload::new(Duration::from_millis(100), 5, Duration::ZERO, &mut rng);

        let mut last = Duration::ZERO;
        for _ in 0..1000 {
            let at = workload.next_arrival();
            assert!(at > last);
            last = at;
            assert!(workload.take_arrival(&mut rng) < 5);
        }
        assert_eq!(workload.generated(), 1000);
    }

    #[test]
    fn test_mean_interval_is_respected() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut workload =
            TransactionWorkload::new(Duration::from_secs(1), 3, Duration::ZERO, &mut rng);

        let samples = 10_000;
        for _ in 0..samples {
            workload.take_arrival(&mut rng);
        }
        let mean = workload.next_arrival().as_secs_f64() / samples as f64;
        assert!((0.9..1.1).contains(&mean), "mean interval {mean}");
    }
}
