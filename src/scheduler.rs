//! Request scheduling disciplines.
//!
//! The event loop hands every parsed request to a scheduler and asks it
//! which request to serve next. Two disciplines are provided:
//!
//! - `FcfsScheduler`: one shared FIFO across all connections. Requests are
//!   served strictly in system-wide arrival order, so a client that
//!   pipelines a burst of requests occupies that many consecutive
//!   head-of-queue slots.
//! - `RoundRobinScheduler`: per-connection FIFOs with a rotating cursor
//!   over the live connections in accept order. Each turn serves exactly
//!   one request from the next connection that has pending work, bounding
//!   how far a pipelined burst can get ahead of everyone else.
//!
//! Parsing and response construction are identical for both; only the
//! "what gets served next" decision differs.

use crate::config::SchedulingMode;
use crate::protocol::Request;
use std::collections::{HashMap, VecDeque};

/// Connection identity as seen by the scheduler (the event loop's slab key).
pub type ConnId = usize;

/// A pluggable "what gets served next" decision.
pub trait Scheduler: Send {
    /// A connection was accepted.
    fn on_connect(&mut self, conn: ConnId);

    /// A full request line was parsed out of a connection's stream.
    fn on_request(&mut self, conn: ConnId, request: Request);

    /// A connection closed; all of its pending work is dropped.
    fn on_disconnect(&mut self, conn: ConnId);

    /// Pick the next request to serve, if any.
    fn pick_next(&mut self) -> Option<(ConnId, Request)>;

    /// Whether any request is waiting to be served.
    fn has_pending(&self) -> bool;

    /// Whether the event loop may keep serving until the queue is empty on
    /// a single wake-up. Round-robin serves one request per wake-up so
    /// newly arrived requests get interleaved fairly.
    fn drain_on_wake(&self) -> bool;
}

/// Construct the scheduler selected by configuration.
pub fn for_mode(mode: SchedulingMode) -> Box<dyn Scheduler> {
    match mode {
        SchedulingMode::Fcfs => Box::new(FcfsScheduler::new()),
        SchedulingMode::RoundRobin => Box::new(RoundRobinScheduler::new()),
    }
}

/// Global first-come-first-served queue.
#[derive(Debug, Default)]
pub struct FcfsScheduler {
    queue: VecDeque<(ConnId, Request)>,
}

impl FcfsScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for FcfsScheduler {
    fn on_connect(&mut self, _conn: ConnId) {}

    fn on_request(&mut self, conn: ConnId, request: Request) {
        self.queue.push_back((conn, request));
    }

    fn on_disconnect(&mut self, conn: ConnId) {
        self.queue.retain(|&(c, _)| c != conn);
    }

    fn pick_next(&mut self) -> Option<(ConnId, Request)> {
        self.queue.pop_front()
    }

    fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    fn drain_on_wake(&self) -> bool {
        true
    }
}

/// One request per connection per turn, in accept order.
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    /// Live connections in accept order; defines the rotation.
    order: Vec<ConnId>,
    /// Pending requests per connection, FIFO within a connection.
    pending: HashMap<ConnId, VecDeque<Request>>,
    /// Rotation position: index into `order` where the next scan starts.
    cursor: usize,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobinScheduler {
    fn on_connect(&mut self, conn: ConnId) {
        self.order.push(conn);
        self.pending.insert(conn, VecDeque::new());
    }

    fn on_request(&mut self, conn: ConnId, request: Request) {
        // Requests from connections we never saw accept for are dropped.
        if let Some(queue) = self.pending.get_mut(&conn) {
            queue.push_back(request);
        }
    }

    fn on_disconnect(&mut self, conn: ConnId) {
        if let Some(pos) = self.order.iter().position(|&c| c == conn) {
            self.order.remove(pos);
            // Keep the cursor pointing at the same next-up connection.
            if pos < self.cursor {
                self.cursor -= 1;
            }
            if self.cursor >= self.order.len() {
                self.cursor = 0;
            }
        }
        self.pending.remove(&conn);
    }

    fn pick_next(&mut self) -> Option<(ConnId, Request)> {
        if self.order.is_empty() {
            return None;
        }
        for step in 0..self.order.len() {
            let idx = (self.cursor + step) % self.order.len();
            let conn = self.order[idx];
            if let Some(request) = self.pending.get_mut(&conn).and_then(VecDeque::pop_front) {
                self.cursor = (idx + 1) % self.order.len();
                return Some((conn, request));
            }
        }
        None
    }

    fn has_pending(&self) -> bool {
        self.pending.values().any(|q| !q.is_empty())
    }

    fn drain_on_wake(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(offset: usize) -> Request {
        Request { offset, count: 5 }
    }

    #[test]
    fn test_fcfs_arrival_order_across_connections() {
        let mut s = FcfsScheduler::new();
        s.on_connect(1);
        s.on_connect(2);
        // A submits three requests before B submits any.
        s.on_request(1, req(0));
        s.on_request(1, req(5));
        s.on_request(1, req(10));
        s.on_request(2, req(0));

        assert_eq!(s.pick_next(), Some((1, req(0))));
        assert_eq!(s.pick_next(), Some((1, req(5))));
        assert_eq!(s.pick_next(), Some((1, req(10))));
        assert_eq!(s.pick_next(), Some((2, req(0))));
        assert_eq!(s.pick_next(), None);
    }

    #[test]
    fn test_fcfs_disconnect_drops_pending() {
        let mut s = FcfsScheduler::new();
        s.on_request(1, req(0));
        s.on_request(2, req(0));
        s.on_request(1, req(5));
        s.on_disconnect(1);
        assert_eq!(s.pick_next(), Some((2, req(0))));
        assert_eq!(s.pick_next(), None);
    }

    #[test]
    fn test_round_robin_interleaves_greedy_burst() {
        let mut s = RoundRobinScheduler::new();
        s.on_connect(1);
        s.on_connect(2);
        // A queues a greedy burst, B queues a single request.
        for i in 0..4 {
            s.on_request(1, req(i * 5));
        }
        s.on_request(2, req(0));

        assert_eq!(s.pick_next(), Some((1, req(0))));
        // B is served before A's second request.
        assert_eq!(s.pick_next(), Some((2, req(0))));
        assert_eq!(s.pick_next(), Some((1, req(5))));
        assert_eq!(s.pick_next(), Some((1, req(10))));
        assert_eq!(s.pick_next(), Some((1, req(15))));
        assert_eq!(s.pick_next(), None);
    }

    #[test]
    fn test_round_robin_never_serves_twice_while_other_pending() {
        let mut s = RoundRobinScheduler::new();
        s.on_connect(1);
        s.on_connect(2);
        for i in 0..8 {
            s.on_request(1, req(i));
            s.on_request(2, req(i));
        }
        let mut last = None;
        while let Some((conn, _)) = s.pick_next() {
            assert_ne!(last, Some(conn), "same connection served consecutively");
            last = Some(conn);
        }
    }

    #[test]
    fn test_round_robin_skips_idle_connections() {
        let mut s = RoundRobinScheduler::new();
        s.on_connect(1);
        s.on_connect(2);
        s.on_connect(3);
        s.on_request(3, req(0));
        assert_eq!(s.pick_next(), Some((3, req(0))));
        assert_eq!(s.pick_next(), None);
    }

    #[test]
    fn test_round_robin_per_connection_fifo() {
        let mut s = RoundRobinScheduler::new();
        s.on_connect(7);
        s.on_request(7, req(0));
        s.on_request(7, req(5));
        s.on_request(7, req(10));
        assert_eq!(s.pick_next(), Some((7, req(0))));
        assert_eq!(s.pick_next(), Some((7, req(5))));
        assert_eq!(s.pick_next(), Some((7, req(10))));
    }

    #[test]
    fn test_round_robin_disconnect_keeps_rotation_valid() {
        let mut s = RoundRobinScheduler::new();
        s.on_connect(1);
        s.on_connect(2);
        s.on_connect(3);
        s.on_request(1, req(0));
        s.on_request(2, req(0));
        s.on_request(3, req(0));

        assert_eq!(s.pick_next(), Some((1, req(0))));
        s.on_disconnect(2);
        assert_eq!(s.pick_next(), Some((3, req(0))));
        assert!(!s.has_pending());
    }

    #[test]
    fn test_round_robin_cursor_wraps_after_tail_disconnect() {
        let mut s = RoundRobinScheduler::new();
        s.on_connect(1);
        s.on_connect(2);
        s.on_request(1, req(0));
        s.on_request(2, req(0));
        assert_eq!(s.pick_next(), Some((1, req(0))));
        assert_eq!(s.pick_next(), Some((2, req(0))));
        s.on_disconnect(2);
        s.on_request(1, req(5));
        assert_eq!(s.pick_next(), Some((1, req(5))));
    }

    #[test]
    fn test_for_mode_selects_policy() {
        let mut fcfs = for_mode(SchedulingMode::Fcfs);
        assert!(fcfs.drain_on_wake());
        fcfs.on_connect(0);
        let mut rr = for_mode(SchedulingMode::RoundRobin);
        assert!(!rr.drain_on_wake());
        rr.on_connect(0);
    }
}
