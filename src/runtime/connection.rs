//! Client connections and the drain-and-echo routine.
//!
//! A connection carries no application state between events. Each
//! readable notification is serviced to completion before the loop
//! moves on, so only the socket itself survives across ticks.

use mio::net::TcpStream;
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, info};

/// Current state of a connection.
///
/// There is no `Closed` variant: a closed connection is one that has
/// been removed from the registry and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted but not yet watched by the multiplexer.
    Accepted,
    /// Watched for readable and peer-closed events.
    Registered,
    /// Inside a drain. Never observable between events.
    Servicing,
}

/// How a drain ended.
#[derive(Debug)]
pub enum Drain {
    /// Read reported `WouldBlock`; wait for the next edge.
    Exhausted,
    /// Read returned zero bytes.
    PeerClosed,
    /// Read or echo failed.
    Failed(io::Error),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub fd: RawFd,
    pub peer: SocketAddr,
    state: ConnState,
}

impl Connection {
    /// Wrap a freshly accepted stream.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        let fd = stream.as_raw_fd();
        Self {
            stream,
            fd,
            peer,
            state: ConnState::Accepted,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Record that the multiplexer now watches this connection.
    pub fn mark_registered(&mut self) {
        debug_assert_eq!(self.state, ConnState::Accepted);
        self.state = ConnState::Registered;
    }

    /// Drain the socket, echoing every chunk back.
    pub fn service(&mut self, scratch: &mut [u8]) -> Drain {
        debug_assert_eq!(self.state, ConnState::Registered);
        self.state = ConnState::Servicing;
        let outcome = drain(&mut self.stream, self.fd, scratch);
        self.state = ConnState::Registered;
        outcome
    }
}

/// Read `stream` until it would block, echoing each chunk as it arrives.
///
/// Reads are bounded by `scratch.len()`. An edge-triggered source does
/// not notify again for bytes left behind, so this only returns
/// `Exhausted` once a read has reported `WouldBlock`.
///
/// Echo writes retry partial writes while the socket accepts bytes. A
/// write that would block is treated as a failure: nothing is queued.
/// The caller then closes the connection with the rest of the input
/// still unread, so the kernel resets it. A client that pipelines more
/// than the send buffer holds before reading therefore loses the whole
/// stream, including bytes already echoed but not yet delivered.
pub fn drain<S>(stream: &mut S, fd: RawFd, scratch: &mut [u8]) -> Drain
where
    S: Read + Write,
{
    loop {
        let n = match stream.read(scratch) {
            Ok(0) => return Drain::PeerClosed,
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Drain::Exhausted,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Drain::Failed(e),
        };

        let chunk = &scratch[..n];
        info!(
            "client #{} sent: {}",
            fd,
            String::from_utf8_lossy(chunk).trim_end_matches(['\r', '\n'])
        );

        if let Err(e) = stream.write_all(chunk) {
            debug!(fd, bytes = n, error = %e, "Echo write failed");
            return Drain::Failed(e);
        }
    }
}

/// Registry of open connections using slab allocation.
///
/// Slab keys double as multiplexer tokens. `remove` hands a connection
/// back at most once, which keeps release single-shot.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity; the connection is
    /// dropped, which closes its socket.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
