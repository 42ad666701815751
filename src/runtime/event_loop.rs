//! Single-threaded, edge-triggered echo event loop.
//!
//! One thread owns the listener, the multiplexer and every connection.
//! The only place it blocks is `Multiplexer::wait`; accept, read and
//! write are all non-blocking. A batch is processed in the order the OS
//! returned it, and each connection's drain runs to completion before
//! the next event is looked at.

use super::connection::{Connection, ConnectionRegistry, Drain};
use super::listener;
use super::poller::{Multiplexer, Ready};
use crate::config::Config;
use crate::error::{During, FatalError};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Connection counters since the loop started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub accepted: u64,
    pub closed: u64,
    pub open: usize,
}

pub struct EventLoop {
    listener: TcpListener,
    mux: Multiplexer,
    connections: ConnectionRegistry,
    /// Reused by every drain; never outlives one read.
    scratch: Vec<u8>,
    ready: Vec<Ready>,
    accepted: u64,
    closed: u64,
}

impl EventLoop {
    /// Bind the listener and register it with a fresh multiplexer.
    pub fn new(config: &Config) -> Result<Self, FatalError> {
        let listener = listener::bind(config.listen, config.backlog)?;
        let mut listener = TcpListener::from_std(listener);

        let mux = Multiplexer::new(config.max_events).during("create multiplexer")?;
        mux.register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .during("register listener")?;

        Ok(Self {
            listener,
            mux,
            connections: ConnectionRegistry::new(config.max_connections),
            scratch: vec![0u8; config.buffer_size],
            ready: Vec::with_capacity(config.max_events),
            accepted: 0,
            closed: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            accepted: self.accepted,
            closed: self.closed,
            open: self.connections.len(),
        }
    }

    /// Serve forever. Returns only on a fatal error.
    pub fn run(&mut self) -> Result<(), FatalError> {
        loop {
            self.turn(None)?;
        }
    }

    /// Wait once and process the whole batch. Returns the batch size.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize, FatalError> {
        let n = self
            .mux
            .wait(&mut self.ready, timeout)
            .during("wait for events")?;

        for i in 0..n {
            let event = self.ready[i];
            self.dispatch(event)?;
        }

        Ok(n)
    }

    fn dispatch(&mut self, event: Ready) -> Result<(), FatalError> {
        if event.token == LISTENER_TOKEN {
            return self.accept_connections();
        }

        let Token(conn_id) = event.token;
        if !self.connections.contains(conn_id) {
            return Ok(());
        }

        let mut finished = false;
        if event.readable {
            if let Some(conn) = self.connections.get_mut(conn_id) {
                match conn.service(&mut self.scratch) {
                    Drain::Exhausted => {}
                    Drain::PeerClosed => {
                        debug!(fd = conn.fd, "Peer closed");
                        finished = true;
                    }
                    Drain::Failed(e) => {
                        debug!(fd = conn.fd, error = %e, "Connection error");
                        finished = true;
                    }
                }
            }
        }

        if finished || event.is_closed() {
            self.close_connection(conn_id);
        }

        Ok(())
    }

    fn accept_connections(&mut self) -> Result<(), FatalError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer)?,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    // The listener edge is spent. Rearm it so connections
                    // still queued (e.g. after EMFILE) surface on the next wait.
                    self.mux
                        .reregister(&mut self.listener, LISTENER_TOKEN, Interest::READABLE)
                        .during("rearm listener")?;
                    return Ok(());
                }
            }
        }
    }

    /// Register an accepted stream before any of its data is read.
    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<(), FatalError> {
        let conn = Connection::new(stream, peer);
        let fd = conn.fd;

        let conn_id = match self.connections.insert(conn) {
            Some(id) => id,
            None => {
                warn!(fd, peer = %peer, "Connection limit reached, closing");
                return Ok(());
            }
        };

        self.accepted += 1;
        info!("new conn: {}", fd);
        debug!(fd, conn_id, peer = %peer, "Accepted connection");

        if let Some(conn) = self.connections.get_mut(conn_id) {
            self.mux
                .register(&mut conn.stream, Token(conn_id), Interest::READABLE)
                .during("register connection")?;
            conn.mark_registered();
        }

        Ok(())
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            if let Err(e) = self.mux.unregister(&mut conn.stream) {
                warn!(fd = conn.fd, error = %e, "Deregister failed");
            }
            self.closed += 1;
            info!("close client: {}", conn.fd);

            let stats = self.stats();
            debug!(
                fd = conn.fd,
                peer = %conn.peer,
                state = ?conn.state(),
                accepted = stats.accepted,
                closed = stats.closed,
                open = stats.open,
                "Connection closed"
            );
        }
    }
}
