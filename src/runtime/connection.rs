//! Connection state machine for the readiness runtime.
//!
//! Each connection walks `Reading -> Sleeping -> Writing` exactly once and
//! is then removed from the registry, which drops (closes) the socket.

use crate::protocol::{RESPONSE, RESPONSE_DELAY};
use slab::Slab;
use std::time::Instant;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the single request read.
    Reading,
    /// Read done, response held back until `until`.
    Sleeping {
        until: Instant,
    },
    /// Writing the fixed response.
    Writing {
        /// Bytes of the response already written.
        written: usize,
    },
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    pub stream: S,
    state: ConnState,
}

impl<S> Connection<S> {
    /// Create a new connection in initial reading state.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: ConnState::Reading,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Record that the read happened, whatever its outcome, and start the
    /// delay. Returns the wake-up deadline.
    pub fn finish_read(&mut self, now: Instant) -> Instant {
        let until = now + RESPONSE_DELAY;
        self.state = ConnState::Sleeping { until };
        until
    }

    /// Move a sleeping connection to writing once its deadline has passed.
    ///
    /// Returns false if the connection is not sleeping or not yet due.
    pub fn wake(&mut self, now: Instant) -> bool {
        match self.state {
            ConnState::Sleeping { until } if until <= now => {
                self.state = ConnState::Writing { written: 0 };
                true
            }
            _ => false,
        }
    }

    /// Response bytes not yet written. Empty outside the writing state.
    pub fn pending_response(&self) -> &'static [u8] {
        match self.state {
            ConnState::Writing { written } => &RESPONSE[written.min(RESPONSE.len())..],
            _ => &[],
        }
    }

    /// Account for `n` written bytes. Returns true once the whole response
    /// is out.
    pub fn advance_write(&mut self, n: usize) -> bool {
        if let ConnState::Writing { written } = self.state {
            let written = written + n;
            self.state = ConnState::Writing { written };
            written >= RESPONSE.len()
        } else {
            false
        }
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. There is no
/// capacity limit: every accepted connection gets a slot.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            connections: Slab::new(),
        }
    }

    /// Insert a new connection, returning its id.
    pub fn insert(&mut self, conn: Connection<S>) -> usize {
        self.connections.insert(conn)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_connection_state_transitions() {
        let start = Instant::now();
        let mut conn = Connection::new(());
        assert_eq!(conn.state(), ConnState::Reading);
        assert!(conn.pending_response().is_empty());

        let until = conn.finish_read(start);
        assert_eq!(until, start + RESPONSE_DELAY);
        assert_eq!(conn.state(), ConnState::Sleeping { until });

        // not due yet
        assert!(!conn.wake(start + Duration::from_millis(499)));
        assert!(conn.pending_response().is_empty());

        assert!(conn.wake(until));
        assert_eq!(conn.state(), ConnState::Writing { written: 0 });
        assert_eq!(conn.pending_response(), RESPONSE);
    }

    #[test]
    fn test_partial_writes() {
        let now = Instant::now();
        let mut conn = Connection::new(());
        let until = conn.finish_read(now);
        assert!(conn.wake(until));

        assert!(!conn.advance_write(9));
        assert_eq!(conn.pending_response(), &RESPONSE[9..]);
        assert_eq!(conn.pending_response(), b"200 OK\r\n\r\nOK\r\n");

        assert!(conn.advance_write(RESPONSE.len() - 9));
        assert!(conn.pending_response().is_empty());
    }

    #[test]
    fn test_write_ignored_outside_writing() {
        let mut conn = Connection::new(());
        assert!(!conn.advance_write(RESPONSE.len()));
        assert_eq!(conn.state(), ConnState::Reading);
        assert!(!conn.wake(Instant::now()));
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new();

        let id1 = registry.insert(Connection::new(10));
        let id2 = registry.insert(Connection::new(11));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get_mut(id2).unwrap().stream, 11);

        assert_eq!(registry.remove(id1).unwrap().stream, 10);
        assert!(registry.remove(id1).is_none());
        assert!(registry.get_mut(id1).is_none());
        assert_eq!(registry.len(), 1);
    }
}
