use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// Errors returned synchronously by [`Selector`](crate::Selector) operations.
///
/// Asynchronous conditions (failed connects, socket errors, hangups) are never
/// returned here; they are delivered through
/// [`Listener::on_error`](crate::Listener::on_error).
#[derive(Debug, Error)]
pub enum SelectorError {
    /// Bookkeeping for a descriptor could not be allocated.
    ///
    /// Nothing was committed: the descriptor is not tracked.
    #[error("out of memory while tracking descriptor {fd}")]
    NoMemory { fd: RawFd },

    /// The OS multiplexer rejected the registration (e.g. descriptor limit).
    #[error("backend rejected descriptor {fd}: {source}")]
    Register {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// The OS multiplexer instance could not be created.
    #[error("failed to create {backend} instance: {source}")]
    Create {
        backend: &'static str,
        #[source]
        source: io::Error,
    },

    /// A negative descriptor was passed in.
    #[error("invalid descriptor {fd}")]
    InvalidDescriptor { fd: RawFd },

    /// The requested backend does not exist on this platform.
    #[error("{backend} is not available on this platform")]
    Unsupported { backend: &'static str },
}

impl SelectorError {
    /// Returns `true` for the resource-exhaustion case.
    pub fn is_no_memory(&self) -> bool {
        matches!(self, Self::NoMemory { .. })
    }
}
