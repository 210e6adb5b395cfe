//! Linux `epoll`-based backend.
//!
//! Responsibilities:
//! - Register file descriptors with read/write interests
//! - Block waiting for I/O readiness
//! - Translate `epoll_event` records into [`Event`]s
//!
//! epoll only hands back what was stored in the event's data word, and this
//! backend stores the bare fd there. By the time an event is processed the
//! fd may already have been detached (or even closed and reused), so the
//! selector resolves every event through its fd table and ignores misses.

use super::unix::{pending_error_or_reset, sys_close};
use super::{Backend, Event, Token, push_merged, timeout_millis};
use crate::Mode;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLPRI, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Linux `epoll` backend.
///
/// This backend owns:
/// - an `epoll` instance,
/// - a reusable, fixed-size event buffer,
/// - the modes currently registered per fd (to pick `ADD` or `MOD`).
pub struct EpollBackend {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events. Its capacity is the per-wait cap.
    events: Vec<epoll_event>,

    /// Descriptors currently in the epoll set.
    registered: HashMap<RawFd, Mode>,
}

impl EpollBackend {
    /// Creates a new `EpollBackend` reporting at most `capacity` events per
    /// wait.
    pub fn new(capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(capacity.max(1)),
            registered: HashMap::new(),
        })
    }

    fn ctl(&self, op: i32, fd: RawFd, mode: Mode) -> io::Result<()> {
        let mut event = epoll_event {
            events: flags_for(mode),
            u64: fd as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// epoll flags for `mode`. Peer hangup is always requested.
fn flags_for(mode: Mode) -> u32 {
    let mut flags = EPOLLRDHUP;

    if mode.is_read() {
        flags |= EPOLLIN | EPOLLPRI;
    }
    if mode.is_write() {
        flags |= EPOLLOUT;
    }

    flags as u32
}

impl Backend for EpollBackend {
    fn name(&self) -> &'static str {
        "epoll"
    }

    fn register(&mut self, fd: RawFd, _token: Token, mode: Mode, existing: bool) -> io::Result<()> {
        let known = self.registered.contains_key(&fd);
        debug_assert_eq!(known, existing, "epoll registration out of sync for fd {fd}");

        if known {
            self.ctl(EPOLL_CTL_MOD, fd, mode)?;
        } else {
            match self.ctl(EPOLL_CTL_ADD, fd, mode) {
                Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                    self.ctl(EPOLL_CTL_MOD, fd, mode)?
                }
                other => other?,
            }
        }

        self.registered.insert(fd, mode);
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd, _token: Token) -> io::Result<()> {
        self.registered.remove(&fd);

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        self.events.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_millis(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        // SAFETY: epoll_wait initialized the first `n` entries.
        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            let fd = ev.u64 as RawFd;
            let flags = ev.events;

            // Removed from the set after the kernel queued the event.
            if !self.registered.contains_key(&fd) {
                continue;
            }

            let mut event = Event::new(fd, None);
            event.readable = flags & ((EPOLLIN | EPOLLPRI) as u32) != 0;
            event.writable = flags & (EPOLLOUT as u32) != 0;
            event.hangup = flags & ((EPOLLHUP | EPOLLRDHUP) as u32) != 0;

            if flags & (EPOLLERR as u32) != 0 {
                event.error = Some(pending_error_or_reset(fd));
            }

            push_merged(events, event);
        }

        Ok(())
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        sys_close(self.epoll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readable_socket() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut backend = EpollBackend::new(16).unwrap();
        backend
            .register(b.as_raw_fd(), Token(1), Mode::READ, false)
            .unwrap();

        a.write_all(b"x").unwrap();

        let mut events = Vec::new();
        backend
            .wait(&mut events, Some(Duration::from_millis(500)))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, b.as_raw_fd());
        assert!(events[0].readable);
        assert!(!events[0].writable);
    }

    #[test]
    fn modify_switches_to_write() {
        let (_a, b) = UnixStream::pair().unwrap();
        let mut backend = EpollBackend::new(16).unwrap();
        let fd = b.as_raw_fd();

        backend.register(fd, Token(1), Mode::NONE, false).unwrap();
        let mut events = Vec::new();
        backend.wait(&mut events, Some(Duration::ZERO)).unwrap();
        assert!(events.is_empty());

        backend.register(fd, Token(1), Mode::WRITE, true).unwrap();
        backend.wait(&mut events, Some(Duration::ZERO)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].writable);

        backend.unregister(fd, Token(1)).unwrap();
        backend.wait(&mut events, Some(Duration::ZERO)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn hangup_is_reported() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut backend = EpollBackend::new(16).unwrap();
        backend
            .register(b.as_raw_fd(), Token(1), Mode::READ, false)
            .unwrap();

        drop(a);

        let mut events = Vec::new();
        backend
            .wait(&mut events, Some(Duration::from_millis(500)))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert!(events[0].hangup);
    }
}
