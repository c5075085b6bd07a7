//! Task-per-connection TCP server on the tokio runtime.
//!
//! The accept loop spawns one task per connection and goes straight back
//! to accepting. Each task reads once, sleeps, writes the fixed response
//! and drops the stream.

use crate::protocol::{READ_BUFFER_SIZE, RESPONSE, RESPONSE_DELAY};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, trace};

/// Server instance. Owns the listening socket for its whole lifetime.
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let server = Server {
            listener: TcpListener::bind(addr).await?,
        };
        debug!(address = %server.local_addr()?, "Server listening");
        Ok(server)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    ///
    /// Only returns on an accept failure, which the caller treats as fatal.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    return Err(e);
                }
            };
            debug!(peer = %peer, "New connection");

            tokio::spawn(async move {
                handle_connection(stream).await;
                debug!(peer = %peer, "Connection closed");
            });
        }
    }
}

/// Build a tokio runtime and serve `addr` on it until accept fails.
pub fn run(addr: &str, workers: Option<usize>) -> io::Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(async {
        let server = Server::bind(addr).await?;
        server.run().await
    })
}

/// Handle a single client connection.
///
/// Read and write outcomes are never inspected; the stream is released when
/// it goes out of scope, on every path.
pub async fn handle_connection<S>(mut stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::zeroed(READ_BUFFER_SIZE);
    match stream.read(&mut buffer).await {
        Ok(n) => trace!(bytes = n, "Discarding request"),
        Err(e) => trace!(error = %e, "Ignoring read error"),
    }

    tokio::time::sleep(RESPONSE_DELAY).await;

    if let Err(e) = stream.write_all(RESPONSE).await {
        trace!(error = %e, "Ignoring write error");
    }
}
