//! kqueue-based backend for macOS and the BSDs.
//!
//! Every registered descriptor owns exactly one pair of filters
//! (`EVFILT_READ` and `EVFILT_WRITE`) for its whole lifetime. Mode changes
//! flip the filters between `EV_ENABLE` and `EV_DISABLE` instead of adding
//! and deleting them, so a mode change is a single `kevent(2)` call and
//! unregistering can always delete both filters.
//!
//! The registration [`Token`] travels in `udata`, so events need no lookup
//! table here. kqueue may report the read and the write filter of one fd in
//! the same batch; both records are merged into one [`Event`].

use super::unix::sys_close;
use super::{Backend, Event, Token, push_merged};
use crate::Mode;

use libc::{
    EV_ADD, EV_DELETE, EV_DISABLE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_WRITE, kevent,
    kqueue, timespec,
};
use std::os::fd::RawFd;
use std::time::Duration;
use std::{io, mem, ptr};

/// Wrapper around a kqueue change or event record.
#[derive(Clone, Copy)]
struct Change(kevent);

impl Change {
    /// Creates a change record for one filter of `fd`.
    fn new(fd: RawFd, filter: i16, flags: u16, token: Token) -> Self {
        // Zeroed first: some platforms carry extra fields (`ext`).
        let mut ev: kevent = unsafe { mem::zeroed() };
        ev.ident = fd as _;
        ev.filter = filter as _;
        ev.flags = flags as _;
        ev.udata = token.0 as usize as _;

        Self(ev)
    }
}

/// BSD / macOS `kqueue` backend.
pub struct KqueueBackend {
    /// kqueue file descriptor.
    queue: RawFd,

    /// Reusable buffer for returned events. Its capacity is the per-wait cap.
    events: Vec<kevent>,
}

impl KqueueBackend {
    /// Creates a new `KqueueBackend` reporting at most `capacity` OS records
    /// per wait.
    pub fn new(capacity: usize) -> io::Result<Self> {
        let queue = unsafe { kqueue() };
        if queue < 0 {
            return Err(io::Error::last_os_error());
        }

        let rc = unsafe { libc::fcntl(queue, libc::F_SETFD, libc::FD_CLOEXEC) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            sys_close(queue);
            return Err(err);
        }

        Ok(Self {
            queue,
            events: Vec::with_capacity(capacity.max(1)),
        })
    }

    fn apply(&self, changes: &[Change]) -> io::Result<()> {
        let rc = unsafe {
            kevent(
                self.queue,
                changes.as_ptr() as *const kevent,
                changes.len() as _,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };

        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

fn toggle(enabled: bool) -> u16 {
    (if enabled { EV_ENABLE } else { EV_DISABLE }) as u16
}

impl Backend for KqueueBackend {
    fn name(&self) -> &'static str {
        "kqueue"
    }

    fn register(&mut self, fd: RawFd, token: Token, mode: Mode, _existing: bool) -> io::Result<()> {
        // EV_ADD on an existing filter only updates it, so one call covers
        // both first registration and mode changes.
        let add = EV_ADD as u16;
        let changes = [
            Change::new(fd, EVFILT_READ as i16, add | toggle(mode.is_read()), token),
            Change::new(fd, EVFILT_WRITE as i16, add | toggle(mode.is_write()), token),
        ];

        self.apply(&changes)
    }

    fn unregister(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        let delete = EV_DELETE as u16;
        let changes = [
            Change::new(fd, EVFILT_READ as i16, delete, token),
            Change::new(fd, EVFILT_WRITE as i16, delete, token),
        ];

        self.apply(&changes)
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        self.events.clear();

        let ts = timeout.map(|t| timespec {
            tv_sec: t.as_secs().min(i32::MAX as u64) as _,
            tv_nsec: t.subsec_nanos() as _,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(ptr::null(), |t| t as *const timespec);

        let n = unsafe {
            kevent(
                self.queue,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as _,
                ts_ptr,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        // SAFETY: kevent initialized the first `n` entries.
        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            let fd = ev.ident as RawFd;
            let token = Token(ev.udata as usize as u64);
            let flags = ev.flags as u16;
            let filter = ev.filter as i16;

            let mut event = Event::new(fd, Some(token));

            if flags & (EV_ERROR as u16) != 0 {
                event.error = Some(ev.data as i32);
                push_merged(events, event);
                continue;
            }

            if filter == EVFILT_READ as i16 {
                event.readable = true;
            } else if filter == EVFILT_WRITE as i16 {
                event.writable = true;
            }

            if flags & (EV_EOF as u16) != 0 {
                event.hangup = true;
                // On EOF, fflags holds the socket error, if any.
                if ev.fflags != 0 {
                    event.error = Some(ev.fflags as i32);
                }
            }

            push_merged(events, event);
        }

        Ok(())
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        sys_close(self.queue);
    }
}
