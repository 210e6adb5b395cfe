//! Platform-specific readiness backends.
//!
//! This module provides a unified interface over the OS readiness
//! facilities (epoll on Linux, kqueue on the BSDs and macOS, and a portable
//! `poll(2)` fallback) plus a deterministic in-memory backend for tests.
//!
//! A backend only knows about descriptors and their aggregated interest.
//! Which listeners sit behind a descriptor is the selector's business; the
//! backend reports `(fd, token, flags)` records and the selector resolves
//! them.
//!
//! The concrete implementation is chosen once, when the selector is built,
//! and never switched afterwards.

pub(crate) mod unix;

mod lab;
mod poll;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
mod kqueue;

pub use lab::{LabBackend, LabCall, LabHandle};
pub use poll::PollBackend;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::EpollBackend;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueueBackend;

use crate::Mode;
use crate::error::SelectorError;

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::time::Duration;

/// Identifier of one descriptor registration.
///
/// Tokens are handed out by the selector, are unique for the lifetime of a
/// selector and are never reused. Backends that can carry user data with an
/// event (kqueue `udata`, the poll slot table) echo the token back so stale
/// events can be told apart from a later registration of the same fd.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Token(pub u64);

/// A readiness record reported by a backend.
///
/// One `Event` describes one descriptor: backends merge every OS record they
/// see for the same fd within a single wait, so each readiness kind is
/// reported at most once per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    /// Descriptor the event refers to.
    pub fd: RawFd,

    /// Registration token, when the backend can carry one.
    ///
    /// `None` means the event must be resolved by fd alone.
    pub token: Option<Token>,

    /// Data (or EOF) is available to read.
    pub readable: bool,

    /// The descriptor can accept a write.
    pub writable: bool,

    /// The peer hung up. Implies both read readiness and an error notify.
    pub hangup: bool,

    /// A hard error is pending, with its native code.
    pub error: Option<i32>,
}

impl Event {
    /// An event with no flags set.
    pub fn new(fd: RawFd, token: Option<Token>) -> Self {
        Self {
            fd,
            token,
            readable: false,
            writable: false,
            hangup: false,
            error: None,
        }
    }

    /// Folds `other` (same descriptor) into `self`.
    pub fn merge(&mut self, other: &Event) {
        self.readable |= other.readable;
        self.writable |= other.writable;
        self.hangup |= other.hangup;
        if self.error.is_none() {
            self.error = other.error;
        }
    }
}

/// Pushes `event`, merging it into an earlier record for the same fd.
pub(crate) fn push_merged(events: &mut Vec<Event>, event: Event) {
    if let Some(e) = events
        .iter_mut()
        .find(|e| e.fd == event.fd && e.token == event.token)
    {
        e.merge(&event);
    } else {
        events.push(event);
    }
}

/// Outcome of one non-blocking connect step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectStatus {
    /// The connection is established.
    Connected,

    /// The connection is still being set up; retry later.
    InProgress,

    /// The connection failed with the given native error code.
    Failed(i32),
}

/// One OS readiness facility.
///
/// All methods are called from the selector's thread only, and never while a
/// listener callback is running.
pub trait Backend {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Registers `fd` with `mode`, or updates its mode if `existing` is true.
    ///
    /// Must be idempotent: updating an fd to the mode it already has must
    /// not create a second registration.
    fn register(&mut self, fd: RawFd, token: Token, mode: Mode, existing: bool) -> io::Result<()>;

    /// Removes `fd`. Failing here means the caller closed the descriptor
    /// without detaching it first.
    fn unregister(&mut self, fd: RawFd, token: Token) -> io::Result<()>;

    /// Blocks for at most `timeout` (`None` = indefinitely) and fills
    /// `events`, which is cleared first.
    ///
    /// An interrupted wait returns `Ok(())` with no events.
    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()>;

    /// Performs one non-blocking connect step for `fd`.
    fn connect(&mut self, fd: RawFd, addr: &SocketAddr) -> ConnectStatus {
        unix::connect_step(fd, addr)
    }

    /// Error code to report for an error or hangup condition on `fd`.
    fn pending_error(&mut self, fd: RawFd) -> i32 {
        unix::pending_error_or_reset(fd)
    }
}

/// Which backend a selector should use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Best available facility on this platform.
    #[default]
    Auto,

    /// Linux `epoll`.
    Epoll,

    /// BSD / macOS `kqueue`.
    Kqueue,

    /// Portable `poll(2)`.
    Poll,
}

impl BackendKind {
    /// The backend `Auto` resolves to on this platform.
    pub fn native() -> Self {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            BackendKind::Epoll
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            BackendKind::Kqueue
        } else {
            BackendKind::Poll
        }
    }
}

/// Creates the backend for `kind`.
pub(crate) fn open(kind: BackendKind, capacity: usize) -> Result<Box<dyn Backend>, SelectorError> {
    match kind {
        BackendKind::Auto => open(BackendKind::native(), capacity),
        BackendKind::Epoll => open_epoll(capacity),
        BackendKind::Kqueue => open_kqueue(capacity),
        BackendKind::Poll => Ok(Box::new(PollBackend::new(capacity))),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_epoll(capacity: usize) -> Result<Box<dyn Backend>, SelectorError> {
    let backend = EpollBackend::new(capacity).map_err(|source| SelectorError::Create {
        backend: "epoll",
        source,
    })?;

    Ok(Box::new(backend))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn open_epoll(_capacity: usize) -> Result<Box<dyn Backend>, SelectorError> {
    Err(SelectorError::Unsupported { backend: "epoll" })
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn open_kqueue(capacity: usize) -> Result<Box<dyn Backend>, SelectorError> {
    let backend = KqueueBackend::new(capacity).map_err(|source| SelectorError::Create {
        backend: "kqueue",
        source,
    })?;

    Ok(Box::new(backend))
}

#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
fn open_kqueue(_capacity: usize) -> Result<Box<dyn Backend>, SelectorError> {
    Err(SelectorError::Unsupported { backend: "kqueue" })
}

/// Converts a wait timeout to whole milliseconds for `epoll_wait`/`poll`.
///
/// Sub-millisecond remainders round up so a short positive timeout never
/// degenerates into a busy non-blocking poll.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => {
            let mut ms = t.as_millis();
            if t.as_nanos() > ms * 1_000_000 {
                ms += 1;
            }
            ms.min(i32::MAX as u128) as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_conversion() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_millis(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }

    #[test]
    fn events_for_the_same_fd_are_merged() {
        let mut events = Vec::new();

        let mut read = Event::new(3, Some(Token(1)));
        read.readable = true;
        let mut write = Event::new(3, Some(Token(1)));
        write.writable = true;
        write.error = Some(libc::EPIPE);
        let other = Event::new(4, Some(Token(2)));

        push_merged(&mut events, read);
        push_merged(&mut events, write);
        push_merged(&mut events, other);

        assert_eq!(events.len(), 2);
        assert!(events[0].readable && events[0].writable);
        assert_eq!(events[0].error, Some(libc::EPIPE));
    }

    #[test]
    fn native_backend_opens() {
        let backend = open(BackendKind::Auto, 8).unwrap();
        let expected = match BackendKind::native() {
            BackendKind::Epoll => "epoll",
            BackendKind::Kqueue => "kqueue",
            _ => "poll",
        };
        assert_eq!(backend.name(), expected);
    }
}
