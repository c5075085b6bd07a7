//! Readiness runtime.
//!
//! An alternative to the task-per-connection server in [`crate::server`]:
//! one thread, one poll instance, and an explicit state machine per
//! connection.
//!
//! - `Connection`: per-connection state (`Reading -> Sleeping -> Writing`)
//! - `DeadlineQueue`: wake-up times for sleeping connections
//! - `mio`: the event loop tying both to the sockets

mod connection;
mod deadline;
mod mio;

pub(crate) use connection::{ConnState, Connection, ConnectionRegistry};
pub(crate) use deadline::DeadlineQueue;

/// Run the readiness runtime on `addr` until accept fails.
pub fn run(addr: &str) -> std::io::Result<()> {
    mio::run(addr)
}
