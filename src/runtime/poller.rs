//! Readiness multiplexer over mio.
//!
//! mio registers every source edge-triggered (`EPOLLET` on Linux,
//! `EV_CLEAR` on kqueue) and always asks for peer half-close alongside
//! readable interest. A readable notification fires once per transition,
//! so whoever consumes it must read until `WouldBlock`.

use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::Duration;

/// Readiness reported for one descriptor by a single wait.
///
/// Copied out of the OS event buffer so the loop can register and
/// deregister sources while walking a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub token: Token,
    pub readable: bool,
    /// Peer shut down its write half or hung up.
    pub read_closed: bool,
    pub error: bool,
}

impl Ready {
    fn from_event(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            read_closed: event.is_read_closed(),
            error: event.is_error(),
        }
    }

    /// Peer-closed or abnormal close.
    pub fn is_closed(&self) -> bool {
        self.read_closed || self.error
    }
}

/// Owns the OS readiness facility and a bounded event batch.
pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    /// Allocate the OS resource. `max_events` bounds one wait's batch.
    pub fn new(max_events: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(max_events),
        })
    }

    /// Start watching `source`, reporting its events under `token`.
    pub fn register<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().register(source, token, interest)
    }

    /// Replace the interest for an already registered `source`.
    ///
    /// The OS re-checks readiness, so a source that is still ready is
    /// reported again on the next wait even without a new edge.
    pub fn reregister<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().reregister(source, token, interest)
    }

    /// Stop watching `source`. Must be called once per registered source.
    pub fn unregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Block until at least one source is ready or `timeout` elapses
    /// (`None` waits forever).
    ///
    /// `ready` is cleared and refilled in the order the OS reported the
    /// events. Returns the number of ready sources. An interrupted wait
    /// yields an empty batch instead of an error.
    pub fn wait(&mut self, ready: &mut Vec<Ready>, timeout: Option<Duration>) -> io::Result<usize> {
        ready.clear();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        ready.extend(self.events.iter().map(Ready::from_event));
        Ok(ready.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{TcpListener, TcpStream};
    use std::io::{Read, Write};
    use std::net::SocketAddr;

    const SERVER: Token = Token(0);
    const CLIENT: Token = Token(1);

    fn wait_for(mux: &mut Multiplexer, token: Token) -> Option<Ready> {
        let mut ready = Vec::new();
        for _ in 0..50 {
            mux.wait(&mut ready, Some(Duration::from_millis(20))).unwrap();
            if let Some(r) = ready.iter().find(|r| r.token == token) {
                return Some(*r);
            }
        }
        None
    }

    fn connected_pair(mux: &mut Multiplexer) -> (TcpStream, std::net::TcpStream) {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut listener = TcpListener::bind(addr).unwrap();
        mux.register(&mut listener, SERVER, Interest::READABLE).unwrap();

        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let ready = wait_for(mux, SERVER).expect("listener never became readable");
        assert!(ready.readable);

        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn test_wait_times_out_empty() {
        let mut mux = Multiplexer::new(8).unwrap();
        let mut ready = vec![Ready {
            token: Token(9),
            readable: true,
            read_closed: false,
            error: false,
        }];

        let n = mux.wait(&mut ready, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(n, 0);
        assert!(ready.is_empty());
    }

    #[test]
    fn test_readable_is_edge_triggered() {
        let mut mux = Multiplexer::new(8).unwrap();
        let (mut server, mut client) = connected_pair(&mut mux);
        mux.register(&mut server, CLIENT, Interest::READABLE).unwrap();

        client.write_all(b"ping").unwrap();
        let ready = wait_for(&mut mux, CLIENT).expect("no readable event");
        assert!(ready.readable);
        assert!(!ready.is_closed());

        // Data left unread: no fresh transition, so no second notification.
        let mut batch = Vec::new();
        mux.wait(&mut batch, Some(Duration::from_millis(50))).unwrap();
        assert!(batch.iter().all(|r| r.token != CLIENT));

        let mut buf = [0u8; 16];
        assert_eq!(server.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
    }

    #[test]
    fn test_reregister_reports_pending_readiness() {
        let mut mux = Multiplexer::new(8).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut listener = TcpListener::bind(addr).unwrap();
        mux.register(&mut listener, SERVER, Interest::READABLE).unwrap();

        let _client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert!(wait_for(&mut mux, SERVER).is_some());

        // Connection left in the backlog: the edge has already fired.
        let mut batch = Vec::new();
        mux.wait(&mut batch, Some(Duration::from_millis(50))).unwrap();
        assert!(batch.iter().all(|r| r.token != SERVER));

        mux.reregister(&mut listener, SERVER, Interest::READABLE).unwrap();
        let ready = wait_for(&mut mux, SERVER).expect("backlog not reported after rearm");
        assert!(ready.readable);
        assert!(listener.accept().is_ok());
    }

    #[test]
    fn test_peer_close_is_reported() {
        let mut mux = Multiplexer::new(8).unwrap();
        let (mut server, client) = connected_pair(&mut mux);
        mux.register(&mut server, CLIENT, Interest::READABLE).unwrap();

        drop(client);
        let ready = wait_for(&mut mux, CLIENT).expect("no close event");
        assert!(ready.is_closed());
    }

    #[test]
    fn test_unregistered_source_is_silent() {
        let mut mux = Multiplexer::new(8).unwrap();
        let (mut server, mut client) = connected_pair(&mut mux);
        mux.register(&mut server, CLIENT, Interest::READABLE).unwrap();
        mux.unregister(&mut server).unwrap();

        client.write_all(b"ignored").unwrap();
        let mut batch = Vec::new();
        mux.wait(&mut batch, Some(Duration::from_millis(50))).unwrap();
        assert!(batch.iter().all(|r| r.token != CLIENT));
    }
}
