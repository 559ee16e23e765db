//! One end of a peer link.

use btcsim_types::NodeIndex;
use std::collections::HashSet;
use std::time::Duration;

/// Which side opened the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Local state for a link to one peer.
#[derive(Debug, Clone)]
pub struct Connection {
    peer: NodeIndex,
    direction: Direction,
    last_pong: Duration,

    /// Address batches waiting for the next flush, one `Addr` each.
    addr_queue: Vec<Vec<NodeIndex>>,

    /// Addresses already queued to this peer in the current window.
    announced: HashSet<NodeIndex>,
}

impl Connection {
    /// A fresh link counts as alive at the moment it is created.
    pub fn new(peer: NodeIndex, direction: Direction, now: Duration) -> Self {
        Self {
            peer,
            direction,
            last_pong: now,
            addr_queue: Vec::new(),
            announced: HashSet::new(),
        }
    }

    pub fn peer(&self) -> NodeIndex {
        self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn last_pong(&self) -> Duration {
        self.last_pong
    }

    pub fn record_pong(&mut self, now: Duration) {
        self.last_pong = now;
    }

    /// Whether the peer has been silent for longer than `timeout`.
    pub fn is_silent(&self, now: Duration, timeout: Duration) -> bool {
        now.saturating_sub(self.last_pong) > timeout
    }

    pub fn queue_addr(&mut self, peers: Vec<NodeIndex>) {
        self.addr_queue.push(peers);
    }

    /// Take every queued batch, leaving the queue empty.
    pub fn take_queue(&mut self) -> Vec<Vec<NodeIndex>> {
        std::mem::take(&mut self.addr_queue)
    }

    /// Number of queued batches.
    pub fn queued(&self) -> usize {
        self.addr_queue.len()
    }

    /// Record that `address` is being announced to this peer. Returns
    /// `false` if it already was in the current window.
    pub fn mark_announced(&mut self, address: NodeIndex) -> bool {
        self.announced.insert(address)
    }

    pub fn clear_announced(&mut self) {
        self.announced.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_and_queue() {
        let mut connection = Connection::new(4, Direction::Outgoing, Duration::from_secs(10));
        assert!(!connection.is_silent(Duration::from_secs(30), Duration::from_secs(20)));
        assert!(connection.is_silent(Duration::from_secs(31), Duration::from_secs(20)));

        connection.record_pong(Duration::from_secs(31));
        assert!(!connection.is_silent(Duration::from_secs(40), Duration::from_secs(20)));

        connection.queue_addr(vec![1, 2]);
        connection.queue_addr(vec![3]);
        assert_eq!(connection.queued(), 2);
        assert_eq!(connection.take_queue(), vec![vec![1, 2], vec![3]]);
        assert_eq!(connection.queued(), 0);

        assert!(connection.mark_announced(7));
        assert!(!connection.mark_announced(7));
        connection.clear_announced();
        assert!(connection.mark_announced(7));
    }
}
