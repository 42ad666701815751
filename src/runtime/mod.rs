//! Readiness-based runtime for the echo server.
//!
//! Built on mio, which uses epoll on Linux and kqueue on macOS, both in
//! edge-triggered mode:
//! - `listener`: Bound, non-blocking listening socket
//! - `poller`: Multiplexer over `mio::Poll`
//! - `connection`: Per-client state and the drain-and-echo routine
//! - `event_loop`: The single thread that ties them together

mod connection;
mod event_loop;
mod listener;
mod poller;

use crate::config::Config;
use crate::error::FatalError;
use event_loop::EventLoop;
use tracing::info;

/// Run the server on the calling thread until a fatal error occurs.
pub fn run(config: Config) -> Result<(), FatalError> {
    let mut event_loop = EventLoop::new(&config)?;

    if let Ok(addr) = event_loop.local_addr() {
        info!(addr = %addr, "Listening");
    }

    event_loop.run()
}
