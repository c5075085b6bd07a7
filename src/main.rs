//! sleep-server: a fixed-response TCP server
//!
//! Every accepted connection is handled independently:
//! - read once (up to 1024 bytes, content ignored)
//! - wait 500 ms without blocking anyone else
//! - write `HTTP/1.1 200 OK\r\n\r\nOK\r\n` and close
//!
//! Two runtimes are available, selected via CLI or TOML file:
//! - tokio: one task per connection (default)
//! - mio: single-threaded readiness loop (epoll/kqueue)
//!
//! Binding `127.0.0.1:55555` or accepting a connection are the only
//! failures that end the process, with a non-zero exit code.

mod config;
mod protocol;
mod runtime;
mod server;

use config::{Config, RuntimeType};
use protocol::LISTEN_ADDR;
use tracing::info;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Target of the startup line. Always enabled, whatever the log level.
const STARTUP_TARGET: &str = "startup";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(filter)?)
        .with_target(false)
        .init();

    announce_startup(&config);

    match config.runtime {
        RuntimeType::Tokio => run_tokio(&config),
        RuntimeType::Mio => run_mio(),
    }
}

/// Extend `filter` so the startup line survives any configured level.
fn log_filter(filter: EnvFilter) -> Result<EnvFilter, ParseError> {
    Ok(filter.add_directive(format!("{STARTUP_TARGET}=info").parse()?))
}

fn announce_startup(config: &Config) {
    info!(target: STARTUP_TARGET, runtime = ?config.runtime, "server started");
}

/// Run with tokio runtime (one task per connection)
fn run_tokio(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    server::run(LISTEN_ADDR, config.workers)?;
    Ok(())
}

/// Run with mio runtime (epoll on Linux, kqueue on macOS)
fn run_mio() -> Result<(), Box<dyn std::error::Error>> {
    runtime::run(LISTEN_ADDR)?;
    Ok(())
}
