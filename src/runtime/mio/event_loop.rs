//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue on
//! macOS.
//!
//! The per-connection delay is not a blocking sleep: a connection that has
//! been read is parked in the [`DeadlineQueue`] and the earliest deadline
//! bounds the poll timeout, so the listener and every other connection keep
//! making progress while it waits.

use crate::protocol::READ_BUFFER_SIZE;
use crate::runtime::{ConnState, Connection, ConnectionRegistry, DeadlineQueue};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, error, trace};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

const LISTEN_BACKLOG: i32 = 128;

/// Single-threaded server owning the listener, the poll instance and every
/// live connection.
pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    connections: ConnectionRegistry<TcpStream>,
    deadlines: DeadlineQueue,
}

impl EventLoop {
    /// Bind the listening socket and register it for accept readiness.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(addr)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let event_loop = Self {
            poll,
            listener,
            connections: ConnectionRegistry::new(),
            deadlines: DeadlineQueue::new(),
        };
        debug!(address = %event_loop.local_addr()?, "Server listening");
        Ok(event_loop)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Drive the loop forever. Only returns on a poll or accept failure.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        loop {
            let timeout = self.deadlines.next_timeout(Instant::now());
            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections()?,
                    Token(conn_id) => self.handle_connection_event(conn_id, event),
                }
            }

            self.wake_sleepers(Instant::now());
        }
    }

    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let conn_id = self.connections.insert(Connection::new(stream));
                    let Some(conn) = self.connections.get_mut(conn_id) else {
                        continue;
                    };
                    if let Err(e) = self.poll.registry().register(
                        &mut conn.stream,
                        Token(conn_id),
                        Interest::READABLE,
                    ) {
                        trace!(conn_id, error = %e, "Failed to register connection");
                        self.close_connection(conn_id);
                        continue;
                    }

                    debug!(conn_id, peer = %peer, "New connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    return Err(e);
                }
            }
        }
    }

    fn handle_connection_event(&mut self, conn_id: usize, event: &Event) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };

        match conn.state() {
            ConnState::Reading
                if event.is_readable() || event.is_read_closed() || event.is_error() =>
            {
                self.read_request(conn_id)
            }
            ConnState::Writing { .. } if event.is_writable() || event.is_error() => {
                self.write_response(conn_id)
            }
            // Sleeping connections ignore readiness until their deadline.
            _ => {}
        }
    }

    /// Perform the single request read, then park the connection.
    fn read_request(&mut self, conn_id: usize) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };

        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            match conn.stream.read(&mut buffer) {
                Ok(n) => trace!(conn_id, bytes = n, "Discarding request"),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => trace!(conn_id, error = %e, "Ignoring read error"),
            }
            break;
        }

        let until = conn.finish_read(Instant::now());
        self.deadlines.push(until, conn_id);
        trace!(conn_id, sleeping = self.deadlines.len(), "Response delayed");
    }

    /// Move every connection whose delay has elapsed to writing.
    fn wake_sleepers(&mut self, now: Instant) {
        if self.deadlines.is_empty() {
            return;
        }
        for conn_id in self.deadlines.pop_expired(now) {
            let Some(conn) = self.connections.get_mut(conn_id) else {
                continue;
            };
            if !conn.wake(now) {
                continue;
            }
            if let Err(e) =
                self.poll
                    .registry()
                    .reregister(&mut conn.stream, Token(conn_id), Interest::WRITABLE)
            {
                trace!(conn_id, error = %e, "Failed to reregister connection");
                self.close_connection(conn_id);
                continue;
            }
            self.write_response(conn_id);
        }
    }

    /// Write as much of the response as the socket takes. The connection is
    /// closed once the response is out or the write fails.
    fn write_response(&mut self, conn_id: usize) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };

        loop {
            let pending = conn.pending_response();
            if pending.is_empty() {
                break;
            }
            match conn.stream.write(pending) {
                Ok(0) => break,
                Ok(n) => {
                    if conn.advance_write(n) {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    trace!(conn_id, error = %e, "Ignoring write error");
                    break;
                }
            }
        }

        self.close_connection(conn_id);
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(conn_id, active = self.connections.len(), "Connection closed");
        }
    }
}

/// Run the mio-based server on `addr` until accept fails.
pub fn run(addr: &str) -> io::Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    EventLoop::bind(addr)?.run()
}

/// Create a non-blocking TCP listener.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
