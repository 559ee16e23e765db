//! Mining as an exponential renewal process.
//!
//! Scheduled events cannot be cancelled, so every attempt gets a number and
//! the `BlockFound` event carries it. When the event fires, the attempt is
//! current only if no newer attempt has been started since; anything else is
//! a stale completion and is dropped.

use btcsim_core::{Action, GossipEvent};
use btcsim_types::{BlockId, TxId};
use rand::Rng;
use rand_distr::Exp1;
use std::time::Duration;
use tracing::trace;

/// Where the mining process stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningState {
    Idle,
    Mining {
        /// Parent of the block being mined.
        target: BlockId,
        /// Number of the pending `BlockFound` event.
        attempt: u64,
        /// When the attempt started.
        started_at: Duration,
    },
}

/// Per-node mining state and mining-derived metrics.
#[derive(Debug, Clone)]
pub struct MiningProcess {
    mean: Duration,
    state: MiningState,
    next_attempt: u64,
    blocks_mined: u64,
    stale_completions: u64,
    wasted: Duration,
}

impl MiningProcess {
    pub fn new(mean: Duration) -> Self {
        Self {
            mean,
            state: MiningState::Idle,
            next_attempt: 0,
            blocks_mined: 0,
            stale_completions: 0,
            wasted: Duration::ZERO,
        }
    }

    /// Start a new attempt on top of `parent`, superseding any attempt in
    /// progress, and return the timer that completes it.
    pub fn schedule_next(
        &mut self,
        now: Duration,
        parent: BlockId,
        transactions: Vec<TxId>,
        rng: &mut impl Rng,
    ) -> Action {
        self.abandon(now);

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let delay = sample_delay(self.mean, rng);

        self.state = MiningState::Mining {
            target: parent,
            attempt,
            started_at: now,
        };
        trace!(parent = %parent, attempt, ?delay, "Scheduled mining attempt");

        Action::timer(
            delay,
            GossipEvent::BlockFound {
                attempt,
                parent,
                transactions,
            },
        )
    }

    /// Settle a `BlockFound` event. Returns `true` if `attempt` is the
    /// current one, in which case the caller finalizes the block.
    pub fn complete(&mut self, attempt: u64) -> bool {
        match self.state {
            MiningState::Mining { attempt: current, .. } if current == attempt => {
                self.state = MiningState::Idle;
                self.blocks_mined += 1;
                true
            }
            _ => {
                self.stale_completions += 1;
                false
            }
        }
    }

    /// Give up the current attempt, if any.
    pub fn stop(&mut self, now: Duration) {
        self.abandon(now);
        self.state = MiningState::Idle;
    }

    fn abandon(&mut self, now: Duration) {
        if let MiningState::Mining { started_at, .. } = self.state {
            self.wasted += now.saturating_sub(started_at);
        }
    }

    pub fn state(&self) -> MiningState {
        self.state
    }

    /// Parent of the block currently being mined.
    pub fn target(&self) -> Option<BlockId> {
        match self.state {
            MiningState::Mining { target, .. } => Some(target),
            MiningState::Idle => None,
        }
    }

    pub fn mean(&self) -> Duration {
        self.mean
    }

    pub fn set_mean(&mut self, mean: Duration) {
        self.mean = mean;
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined
    }

    /// Completions that arrived after their attempt was superseded.
    pub fn stale_completions(&self) -> u64 {
        self.stale_completions
    }

    /// Time spent on attempts that were superseded before completing.
    pub fn wasted_time(&self) -> Duration {
        self.wasted
    }
}

/// Draw an exponential delay with the given mean, rounded to whole
/// milliseconds and never zero.
pub(crate) fn sample_delay(mean: Duration, rng: &mut impl Rng) -> Duration {
    let draw: f64 = rng.sample(Exp1);
    let millis = (draw * mean.as_millis() as f64).round() as u64;
    Duration::from_millis(millis.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn attempt_of(action: &Action) -> u64 {
        match action {
            Action::SetTimer {
                event: btcsim_core::Event::Gossip(GossipEvent::BlockFound { attempt, .. }),
                ..
            } => *attempt,
            other => panic!("expected a BlockFound timer, got {other:?}"),
        }
    }

    #[test]
    fn test_sample_delay_mean_and_floor() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mean = Duration::from_secs(600);
        let samples = 20_000;

        let total: Duration = (0..samples).map(|_| sample_delay(mean, &mut rng)).sum();
        let average = total.as_secs_f64() / samples as f64;
        assert!((average - 600.0).abs() < 30.0, "average {average}");

        let tiny = sample_delay(Duration::ZERO, &mut rng);
        assert_eq!(tiny, Duration::from_millis(1));
    }

    #[test]
    fn test_superseded_attempt_is_stale() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut mining = MiningProcess::new(Duration::from_secs(60));

        let first = mining.schedule_next(Duration::ZERO, BlockId::GENESIS, vec![], &mut rng);
        let second =
            mining.schedule_next(Duration::from_secs(5), BlockId(1), vec![], &mut rng);

        assert_eq!(mining.target(), Some(BlockId(1)));
        assert!(!mining.complete(attempt_of(&first)));
        assert!(mining.complete(attempt_of(&second)));
        assert_eq!(mining.state(), MiningState::Idle);
        assert_eq!(mining.blocks_mined(), 1);
        assert_eq!(mining.stale_completions(), 1);
        assert_eq!(mining.wasted_time(), Duration::from_secs(5));
    }

    #[test]
    fn test_stop_makes_pending_attempt_stale() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut mining = MiningProcess::new(Duration::from_secs(60));

        let timer = mining.schedule_next(Duration::ZERO, BlockId::GENESIS, vec![], &mut rng);
        mining.stop(Duration::from_secs(2));

        assert_eq!(mining.target(), None);
        assert!(!mining.complete(attempt_of(&timer)));
        assert_eq!(mining.wasted_time(), Duration::from_secs(2));
    }
}
