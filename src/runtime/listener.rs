//! Listening socket setup.
//!
//! Every step is fatal on failure: a port that cannot be bound is a
//! configuration problem, not a transient one, so nothing is retried.

use crate::error::{During, FatalError};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener};

/// Create a bound, listening, non-blocking TCP socket on `addr`.
pub fn bind(addr: SocketAddr, backlog: i32) -> Result<TcpListener, FatalError> {
    let socket = Socket::new(
        Domain::for_address(addr),
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .during("create socket")?;

    socket
        .set_reuse_address(true)
        .during("set SO_REUSEADDR")?;
    socket.set_nonblocking(true).during("set non-blocking")?;
    socket.bind(&addr.into()).during("bind")?;
    socket.listen(backlog).during("listen")?;

    Ok(socket.into())
}
