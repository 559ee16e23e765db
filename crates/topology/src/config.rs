//! Configuration for overlay maintenance.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection limits, timers and address-gossip parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Maximum actively initiated connections.
    pub max_outgoing: usize,

    /// Maximum passively accepted connections.
    pub max_incoming: usize,

    /// Hard cap on the address book. Exceeding it aborts the run.
    pub max_known_peers: usize,

    /// Interval between ping rounds.
    pub ping_interval: Duration,

    /// A connection with no pong for longer than this is evicted.
    pub pong_timeout: Duration,

    /// Interval between self-announcements to every connection.
    pub addr_queue_interval: Duration,

    /// Interval between flushes of one connection's address queue. Also the
    /// window during which an address is not re-announced to the same peer.
    pub addr_flush_interval: Duration,

    /// How long an outgoing attempt may stay unanswered.
    pub connect_timeout: Duration,

    /// `Addr` lists at most this long are re-gossiped.
    pub addr_gossip_threshold: usize,

    /// Number of connections each re-gossiped address is queued to.
    pub addr_gossip_fanout: usize,

    /// Share of the address book returned for a `GetAddr`.
    pub getaddr_fraction: f64,

    /// Upper bound on addresses returned for a `GetAddr`.
    pub getaddr_max: usize,

    /// Whether ping/pong liveness checking runs at all.
    pub ping_enabled: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            max_outgoing: 8,
            max_incoming: 117,
            max_known_peers: 20_480,
            ping_interval: Duration::from_secs(2 * 60),
            pong_timeout: Duration::from_secs(20 * 60),
            addr_queue_interval: Duration::from_secs(24 * 60 * 60),
            addr_flush_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(11),
            addr_gossip_threshold: 10,
            addr_gossip_fanout: 2,
            getaddr_fraction: 0.23,
            getaddr_max: 2500,
            ping_enabled: true,
        }
    }
}

impl TopologyConfig {
    /// Set both connection limits.
    pub fn with_limits(mut self, max_outgoing: usize, max_incoming: usize) -> Self {
        self.max_outgoing = max_outgoing;
        self.max_incoming = max_incoming;
        self
    }

    /// Set the address book cap.
    pub fn with_max_known_peers(mut self, max: usize) -> Self {
        self.max_known_peers = max;
        self
    }

    /// Set the ping interval and pong timeout.
    pub fn with_liveness(mut self, ping_interval: Duration, pong_timeout: Duration) -> Self {
        self.ping_interval = ping_interval;
        self.pong_timeout = pong_timeout;
        self
    }

    /// Disable ping/pong liveness checking.
    pub fn without_ping(mut self) -> Self {
        self.ping_enabled = false;
        self
    }
}
