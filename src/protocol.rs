//! Wire constants shared by both runtimes.
//!
//! The server does not parse requests. Every connection gets one read of
//! at most [`READ_BUFFER_SIZE`] bytes, a [`RESPONSE_DELAY`] pause, and the
//! same [`RESPONSE`] bytes before it is closed.

use std::time::Duration;

/// Address the listener binds to. Not configurable.
pub const LISTEN_ADDR: &str = "127.0.0.1:55555";

/// Upper bound for the single request read. The content is discarded.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Pause between the request read and the response write.
pub const RESPONSE_DELAY: Duration = Duration::from_millis(500);

/// Minimal HTTP/1.1 response: status line, empty header section, `OK` body.
pub const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\nOK\r\n";
