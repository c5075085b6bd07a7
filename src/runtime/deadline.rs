//! Wake-up deadlines for sleeping connections.
//!
//! The readiness runtime has no timers of its own, so pending deadlines are
//! kept in a min-heap and the earliest one bounds the poll timeout.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Min-heap of `(deadline, connection id)` pairs.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<(Instant, usize)>>,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, until: Instant, conn_id: usize) {
        self.heap.push(Reverse((until, conn_id)));
    }

    /// How long the event loop may block before the next deadline is due.
    ///
    /// `None` means nothing is pending and poll may block indefinitely.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.heap
            .peek()
            .map(|Reverse((until, _))| until.saturating_duration_since(now))
    }

    /// Remove and return every connection whose deadline is at or before `now`,
    /// earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<usize> {
        let mut due = Vec::new();
        while let Some(Reverse((until, conn_id))) = self.heap.peek().copied() {
            if until > now {
                break;
            }
            self.heap.pop();
            due.push(conn_id);
        }
        due
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

    #[test]
    fn test_empty_queue_blocks_forever() {
        let queue = DeadlineQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.next_timeout(Instant::now()), None);
    }

    #[test]
    fn test_timeout_tracks_earliest() {
        let now = Instant::now();
        let mut queue = DeadlineQueue::new();
        queue.push(now + Duration::from_millis(300), 1);
        queue.push(now + Duration::from_millis(100), 2);
        queue.push(now + Duration::from_millis(200), 3);

        assert_eq!(queue.next_timeout(now), Some(Duration::from_millis(100)));
        // overdue deadlines do not produce a negative timeout
        assert_eq!(
            queue.next_timeout(now + Duration::from_secs(1)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_pop_expired_in_order() {
        let now = Instant::now();
        let mut queue = DeadlineQueue::new();
        queue.push(now + Duration::from_millis(300), 1);
        queue.push(now + Duration::from_millis(100), 2);
        queue.push(now + Duration::from_millis(200), 3);

        assert!(queue.pop_expired(now).is_empty());
        assert_eq!(queue.pop_expired(now + Duration::from_millis(200)), vec![2, 3]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_expired(now + Duration::from_secs(1)), vec![1]);
        assert!(queue.is_empty());
    }
}
