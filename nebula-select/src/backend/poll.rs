//! Portable `poll(2)`-based backend.
//!
//! This backend keeps its own registry of descriptors and rebuilds the
//! `pollfd` array on every wait. It is selected when neither epoll nor
//! kqueue is available, and can be forced with
//! [`BackendKind::Poll`](super::BackendKind::Poll).

use super::unix::pending_error_or_reset;
use super::{Backend, Event, Token, push_merged, timeout_millis};
use crate::Mode;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI, nfds_t, pollfd};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Registration record: `fd → (token, mode)`.
#[derive(Clone, Copy)]
struct Slot {
    fd: RawFd,
    token: Token,
    mode: Mode,
}

/// Readiness backend based on `poll(2)`.
pub struct PollBackend {
    /// Registered descriptors, in registration order.
    slots: Vec<Slot>,

    /// Position of each fd in `slots`.
    index: HashMap<RawFd, usize>,

    /// Reusable `pollfd` buffer, parallel to `slots` during a wait.
    fds: Vec<pollfd>,

    /// Maximum number of events reported per wait.
    capacity: usize,

    /// Slot where the next report starts, so that a full batch does not
    /// starve the descriptors registered last.
    cursor: usize,
}

impl PollBackend {
    /// Creates a new `PollBackend` reporting at most `capacity` events per
    /// wait.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            fds: Vec::new(),
            capacity: capacity.max(1),
            cursor: 0,
        }
    }
}

fn poll_events(mode: Mode) -> i16 {
    let mut events = 0;

    if mode.is_read() {
        events |= POLLIN | POLLPRI;
    }
    if mode.is_write() {
        events |= POLLOUT;
    }

    events
}

impl Backend for PollBackend {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn register(&mut self, fd: RawFd, token: Token, mode: Mode, _existing: bool) -> io::Result<()> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        match self.index.get(&fd) {
            Some(&i) => {
                self.slots[i].token = token;
                self.slots[i].mode = mode;
            }
            None => {
                self.slots
                    .try_reserve(1)
                    .map_err(|_| io::Error::from_raw_os_error(libc::ENOMEM))?;
                self.index.insert(fd, self.slots.len());
                self.slots.push(Slot { fd, token, mode });
            }
        }

        Ok(())
    }

    fn unregister(&mut self, fd: RawFd, _token: Token) -> io::Result<()> {
        let Some(i) = self.index.remove(&fd) else {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        };

        self.slots.swap_remove(i);
        if let Some(moved) = self.slots.get(i) {
            self.index.insert(moved.fd, i);
        }

        Ok(())
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        self.fds.clear();
        self.fds.extend(self.slots.iter().map(|slot| pollfd {
            fd: slot.fd,
            events: poll_events(slot.mode),
            revents: 0,
        }));

        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as nfds_t,
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

        if n == 0 || self.fds.is_empty() {
            return Ok(());
        }

        let total = self.fds.len();
        let start = self.cursor % total;

        for step in 0..total {
            if events.len() >= self.capacity {
                self.cursor = (start + step) % total;
                return Ok(());
            }

            let i = (start + step) % total;
            let revents = self.fds[i].revents;
            if revents == 0 {
                continue;
            }

            let slot = self.slots[i];
            let mut event = Event::new(slot.fd, Some(slot.token));
            event.readable = revents & (POLLIN | POLLPRI) != 0;
            event.writable = revents & POLLOUT != 0;
            event.hangup = revents & POLLHUP != 0;

            if revents & POLLNVAL != 0 {
                event.error = Some(libc::EBADF);
            } else if revents & POLLERR != 0 {
                event.error = Some(pending_error_or_reset(slot.fd));
            }

            push_merged(events, event);
        }

        self.cursor = start;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_token_with_readiness() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut backend = PollBackend::new(8);
        backend
            .register(b.as_raw_fd(), Token(42), Mode::READ, false)
            .unwrap();

        a.write_all(b"ping").unwrap();

        let mut events = Vec::new();
        backend
            .wait(&mut events, Some(Duration::from_millis(500)))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, Some(Token(42)));
        assert!(events[0].readable);
    }

    #[test]
    fn batch_is_capped_and_rotates() {
        let pairs: Vec<_> = (0..3).map(|_| UnixStream::pair().unwrap()).collect();
        let mut backend = PollBackend::new(2);
        for (i, (_, b)) in pairs.iter().enumerate() {
            backend
                .register(b.as_raw_fd(), Token(i as u64), Mode::WRITE, false)
                .unwrap();
        }

        let mut events = Vec::new();
        backend.wait(&mut events, Some(Duration::ZERO)).unwrap();
        assert_eq!(events.len(), 2);
        let first: Vec<_> = events.iter().map(|e| e.token).collect();

        backend.wait(&mut events, Some(Duration::ZERO)).unwrap();
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].token, first[0]);
    }

    #[test]
    fn unregister_unknown_fd_fails() {
        let mut backend = PollBackend::new(8);
        assert!(backend.unregister(77, Token(0)).is_err());
    }

    #[test]
    fn swap_remove_keeps_index_consistent() {
        let pairs: Vec<_> = (0..3).map(|_| UnixStream::pair().unwrap()).collect();
        let mut backend = PollBackend::new(8);
        for (i, (_, b)) in pairs.iter().enumerate() {
            backend
                .register(b.as_raw_fd(), Token(i as u64), Mode::WRITE, false)
                .unwrap();
        }

        backend.unregister(pairs[0].1.as_raw_fd(), Token(0)).unwrap();
        backend.unregister(pairs[2].1.as_raw_fd(), Token(2)).unwrap();

        let mut events = Vec::new();
        backend.wait(&mut events, Some(Duration::ZERO)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, Some(Token(1)));
    }
}
