//! Fatal error type for the server.
//!
//! Only setup and multiplexer failures surface here. Per-connection
//! errors are absorbed by the event loop and never reach the process.

use std::io;
use thiserror::Error;

/// An unrecoverable OS failure, tagged with the operation that failed.
#[derive(Debug, Error)]
#[error("unable to {op}: {source}")]
pub struct FatalError {
    op: &'static str,
    #[source]
    source: io::Error,
}

impl FatalError {
    /// Name of the failing operation (e.g. `bind`, `listen`).
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Raw OS error code, if the failure came from a syscall.
    pub fn errno(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

/// Attach an operation name to an I/O result, turning it fatal.
pub trait During<T> {
    fn during(self, op: &'static str) -> Result<T, FatalError>;
}

impl<T> During<T> for io::Result<T> {
    fn during(self, op: &'static str) -> Result<T, FatalError> {
        self.map_err(|source| FatalError { op, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_error_names_operation() {
        let result: io::Result<()> = Err(io::Error::from_raw_os_error(98));
        let err = result.during("bind").unwrap_err();

        assert_eq!(err.op(), "bind");
        assert_eq!(err.errno(), Some(98));
        let msg = err.to_string();
        assert!(msg.starts_with("unable to bind: "));
        assert!(msg.contains("os error 98"));
    }

    #[test]
    fn test_during_passes_success_through() {
        let result: io::Result<u32> = Ok(7);
        assert_eq!(result.during("listen").unwrap(), 7);
    }
}
