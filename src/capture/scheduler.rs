//! # Finalization Deadlines
//!
//! Grace-period timers are plain data: a deadline names the session,
//! incarnation, direction and turn it was armed for plus the epoch it was
//! issued at. Ending a session purges its deadlines.
//! The queue is a min-heap ordered by due instant, ties broken by epoch, so
//! firing order is deterministic under a virtual clock.

use crate::capture::events::Direction;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tokio::time::Instant;

/// A finalization timer armed for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadline {
    pub due: Instant,
    /// Issue order, unique per queue
    pub epoch: u64,
    pub session_id: String,
    /// Incarnation of the session id the timer was armed for
    pub generation: u64,
    pub direction: Direction,
    pub turn_id: u64,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.epoch.cmp(&other.epoch))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<Deadline>>,
    next_epoch: u64,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer; returns its epoch.
    pub fn arm(
        &mut self,
        due: Instant,
        session_id: &str,
        generation: u64,
        direction: Direction,
        turn_id: u64,
    ) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.heap.push(Reverse(Deadline {
            due,
            epoch,
            session_id: session_id.to_string(),
            generation,
            direction,
            turn_id,
        }));
        epoch
    }

    /// Earliest due instant, if any timer is armed.
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(deadline)| deadline.due)
    }

    /// Remove and return the earliest deadline if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Deadline> {
        if self.next_due()? > now {
            return None;
        }
        self.heap.pop().map(|Reverse(deadline)| deadline)
    }

    /// Drop every timer armed for `session_id`; returns how many.
    pub fn purge_session(&mut self, session_id: &str) -> usize {
        let before = self.heap.len();
        self.heap
            .retain(|Reverse(deadline)| deadline.session_id != session_id);
        before - self.heap.len()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pops_in_due_order() {
        let t0 = Instant::now();
        let mut queue = DeadlineQueue::new();
        queue.arm(t0 + Duration::from_millis(1500), "s", 0, Direction::Input, 1);
        queue.arm(t0 + Duration::from_millis(500), "s", 0, Direction::Output, 2);

        assert_eq!(queue.next_due(), Some(t0 + Duration::from_millis(500)));
        assert!(queue.pop_due(t0 + Duration::from_millis(499)).is_none());

        let first = queue.pop_due(t0 + Duration::from_millis(2000)).unwrap();
        assert_eq!(first.turn_id, 2);
        let second = queue.pop_due(t0 + Duration::from_millis(2000)).unwrap();
        assert_eq!(second.turn_id, 1);
        assert!(queue.pop_due(t0 + Duration::from_millis(2000)).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ties_break_by_epoch() {
        let due = Instant::now();
        let mut queue = DeadlineQueue::new();
        let a = queue.arm(due, "s", 0, Direction::Input, 5);
        let b = queue.arm(due, "s", 0, Direction::Input, 3);
        assert!(a < b);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_due(due).unwrap().turn_id, 5);
        assert_eq!(queue.pop_due(due).unwrap().turn_id, 3);
    }

    #[test]
    fn test_purge_drops_only_that_session() {
        let t0 = Instant::now();
        let mut queue = DeadlineQueue::new();
        queue.arm(t0 + Duration::from_millis(500), "a", 0, Direction::Output, 1);
        queue.arm(t0 + Duration::from_millis(100), "b", 1, Direction::Input, 1);
        queue.arm(t0 + Duration::from_millis(1500), "a", 0, Direction::Input, 2);

        assert_eq!(queue.purge_session("a"), 2);
        assert_eq!(queue.purge_session("a"), 0);
        assert_eq!(queue.len(), 1);
        let left = queue.pop_due(t0 + Duration::from_millis(2000)).unwrap();
        assert_eq!(left.session_id, "b");
        assert_eq!(left.generation, 1);
    }
}
