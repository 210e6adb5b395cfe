use super::Selector;
use crate::backend::{self, Backend, BackendKind};
use crate::error::SelectorError;

use std::time::Duration;

/// Default number of events collected per backend wait.
pub(crate) const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default cap on a wait while connects are pending.
pub(crate) const DEFAULT_CONNECT_RETRY: Duration = Duration::from_millis(10);

/// Builder for configuring and creating a [`Selector`].
///
/// # Examples
///
/// ```rust,no_run
/// use nebula_select::{BackendKind, SelectorBuilder};
/// use std::time::Duration;
///
/// let selector = SelectorBuilder::new()
///     .backend(BackendKind::Poll)
///     .event_capacity(128)
///     .connect_retry_interval(Duration::from_millis(5))
///     .build()?;
/// # Ok::<(), nebula_select::SelectorError>(())
/// ```
#[derive(Clone, Debug)]
pub struct SelectorBuilder {
    /// Which OS facility to use.
    backend: BackendKind,

    /// Maximum number of events collected per wait.
    event_capacity: usize,

    /// Upper bound on a wait while descriptors are still connecting.
    connect_retry_interval: Duration,
}

impl SelectorBuilder {
    /// Creates a new `SelectorBuilder` with default configuration.
    ///
    /// By default the best backend for the platform is used, up to 64
    /// events are collected per wait, and pending connects are retried at
    /// least every 10 ms.
    pub fn new() -> Self {
        Self {
            backend: BackendKind::Auto,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            connect_retry_interval: DEFAULT_CONNECT_RETRY,
        }
    }

    /// Selects the backend.
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    /// Sets how many events a single wait may collect.
    ///
    /// Events beyond this are picked up by the next [`Selector::poll`].
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn event_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "event_capacity must be > 0");

        self.event_capacity = n;
        self
    }

    /// Sets the longest a wait may block while connects are pending.
    ///
    /// Connecting descriptors are not registered with the backend, so
    /// without this cap a `poll(None)` could sleep past a completed connect.
    pub fn connect_retry_interval(mut self, interval: Duration) -> Self {
        self.connect_retry_interval = interval;
        self
    }

    /// Builds the selector with the configured options.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::Unsupported`] if the requested backend does
    /// not exist on this platform, or [`SelectorError::Create`] if the OS
    /// refused to create the multiplexer.
    pub fn build(self) -> Result<Selector, SelectorError> {
        let backend = backend::open(self.backend, self.event_capacity)?;
        Ok(self.build_with(backend))
    }

    /// Builds the selector on top of an already constructed backend.
    ///
    /// The event capacity is the backend's own business in this case.
    pub fn build_with(self, backend: Box<dyn Backend>) -> Selector {
        Selector::from_parts(backend, self.event_capacity, self.connect_retry_interval)
    }
}

impl Default for SelectorBuilder {
    /// Creates a default `SelectorBuilder`.
    fn default() -> Self {
        Self::new()
    }
}
