//! edge-echo: a single-threaded TCP echo server
//!
//! Every byte a client sends is written straight back to it. One thread
//! serves all connections through an edge-triggered readiness loop.
//!
//! Features:
//! - Non-blocking accept, read and write on every socket
//! - Drain-to-exhaustion reads, echoed in fixed-size chunks
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod runtime;

use config::Config;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        max_connections = config.max_connections,
        buffer_size = config.buffer_size,
        max_events = config.max_events,
        "Starting edge-echo server"
    );

    match runtime::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(op = e.op(), errno = ?e.errno(), "Fatal error");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
