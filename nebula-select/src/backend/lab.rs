//! Deterministic lab backend.
//!
//! The lab backend provides a controllable, deterministic event source for
//! testing the selector without relying on OS-level facilities. Tests keep a
//! [`LabHandle`] to inject readiness, script connect outcomes, and inspect
//! which registrations the selector performed.
//!
//! Injected events are delivered as-is on the next wait, even if the fd has
//! been unregistered in the meantime: that is exactly the race the selector
//! has to tolerate.

use super::{Backend, ConnectStatus, Event, Token};
use crate::Mode;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

/// A call the selector made into the lab backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabCall {
    Register {
        fd: RawFd,
        token: Token,
        mode: Mode,
        existing: bool,
    },
    Unregister {
        fd: RawFd,
        token: Token,
    },
    Wait {
        timeout: Option<Duration>,
    },
    Connect {
        fd: RawFd,
        addr: SocketAddr,
    },
}

#[derive(Default)]
struct LabState {
    registrations: HashMap<RawFd, (Token, Mode)>,
    pending: VecDeque<Event>,
    connects: HashMap<RawFd, VecDeque<ConnectStatus>>,
    errors: HashMap<RawFd, i32>,
    fail_register: Option<i32>,
    fail_register_for: HashMap<RawFd, i32>,
    interrupt_next: bool,
    calls: Vec<LabCall>,
}

/// In-memory backend driven by a [`LabHandle`].
pub struct LabBackend {
    state: Rc<RefCell<LabState>>,
    capacity: usize,
}

/// Test-side control of a [`LabBackend`].
#[derive(Clone)]
pub struct LabHandle {
    state: Rc<RefCell<LabState>>,
}

impl LabBackend {
    /// Creates a lab backend reporting at most `capacity` events per wait.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(LabState::default())),
            capacity: capacity.max(1),
        }
    }

    /// Returns a handle controlling this backend.
    pub fn handle(&self) -> LabHandle {
        LabHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for LabBackend {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Backend for LabBackend {
    fn name(&self) -> &'static str {
        "lab"
    }

    fn register(&mut self, fd: RawFd, token: Token, mode: Mode, existing: bool) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(LabCall::Register {
            fd,
            token,
            mode,
            existing,
        });

        if let Some(errno) = state.fail_register_for.remove(&fd) {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if let Some(errno) = state.fail_register.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }

        state.registrations.insert(fd, (token, mode));
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(LabCall::Unregister { fd, token });

        match state.registrations.remove(&fd) {
            Some(_) => Ok(()),
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        let mut state = self.state.borrow_mut();
        state.calls.push(LabCall::Wait { timeout });

        if std::mem::take(&mut state.interrupt_next) {
            return Ok(());
        }

        while events.len() < self.capacity {
            let Some(event) = state.pending.pop_front() else {
                break;
            };
            super::push_merged(events, event);
        }

        Ok(())
    }

    fn connect(&mut self, fd: RawFd, addr: &SocketAddr) -> ConnectStatus {
        let mut state = self.state.borrow_mut();
        state.calls.push(LabCall::Connect { fd, addr: *addr });

        match state.connects.get_mut(&fd) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(ConnectStatus::Connected),
            Some(script) => script.front().copied().unwrap_or(ConnectStatus::Connected),
            None => ConnectStatus::Connected,
        }
    }

    fn pending_error(&mut self, fd: RawFd) -> i32 {
        self.state
            .borrow_mut()
            .errors
            .remove(&fd)
            .unwrap_or(libc::ECONNRESET)
    }
}

impl LabHandle {
    fn push(&self, fd: RawFd, apply: impl FnOnce(&mut Event)) {
        let mut state = self.state.borrow_mut();
        let token = state.registrations.get(&fd).map(|(token, _)| *token);

        let mut event = Event::new(fd, token);
        apply(&mut event);
        state.pending.push_back(event);
    }

    /// Queues a read-readiness event for `fd`.
    pub fn readable(&self, fd: RawFd) {
        self.push(fd, |e| e.readable = true);
    }

    /// Queues a write-readiness event for `fd`.
    pub fn writable(&self, fd: RawFd) {
        self.push(fd, |e| e.writable = true);
    }

    /// Queues a hangup for `fd`.
    pub fn hangup(&self, fd: RawFd) {
        self.push(fd, |e| e.hangup = true);
    }

    /// Queues a hard error for `fd`.
    pub fn error(&self, fd: RawFd, errno: i32) {
        self.push(fd, |e| e.error = Some(errno));
    }

    /// Queues an arbitrary event, delivered exactly as given.
    pub fn inject(&self, event: Event) {
        self.state.borrow_mut().pending.push_back(event);
    }

    /// Scripts the outcomes of successive connect steps for `fd`.
    ///
    /// The last outcome repeats once the script is exhausted. Without a
    /// script, connects succeed immediately.
    pub fn script_connect(&self, fd: RawFd, outcomes: impl IntoIterator<Item = ConnectStatus>) {
        self.state
            .borrow_mut()
            .connects
            .insert(fd, outcomes.into_iter().collect());
    }

    /// Replaces the outcome of the next connect steps for `fd`.
    pub fn set_connect(&self, fd: RawFd, outcome: ConnectStatus) {
        self.script_connect(fd, [outcome]);
    }

    /// Pending socket error of `fd`. Like `SO_ERROR`, the first read
    /// clears it.
    pub fn set_pending_error(&self, fd: RawFd, errno: i32) {
        self.state.borrow_mut().errors.insert(fd, errno);
    }

    /// Makes the next registration fail with `errno`.
    pub fn fail_next_register(&self, errno: i32) {
        self.state.borrow_mut().fail_register = Some(errno);
    }

    /// Makes the next registration of `fd` fail with `errno`.
    pub fn fail_register_for(&self, fd: RawFd, errno: i32) {
        self.state.borrow_mut().fail_register_for.insert(fd, errno);
    }

    /// Makes the next wait behave like an interrupted system call.
    pub fn interrupt_next_wait(&self) {
        self.state.borrow_mut().interrupt_next = true;
    }

    /// Mode currently registered for `fd`, if any.
    pub fn registered_mode(&self, fd: RawFd) -> Option<Mode> {
        self.state
            .borrow()
            .registrations
            .get(&fd)
            .map(|(_, mode)| *mode)
    }

    /// Token currently registered for `fd`, if any.
    pub fn registered_token(&self, fd: RawFd) -> Option<Token> {
        self.state
            .borrow()
            .registrations
            .get(&fd)
            .map(|(token, _)| *token)
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<LabCall> {
        self.state.borrow().calls.clone()
    }

    /// Number of register calls made for `fd`.
    pub fn register_count(&self, fd: RawFd) -> usize {
        self.count(|call| matches!(call, LabCall::Register { fd: f, .. } if *f == fd))
    }

    /// Number of unregister calls made for `fd`.
    pub fn unregister_count(&self, fd: RawFd) -> usize {
        self.count(|call| matches!(call, LabCall::Unregister { fd: f, .. } if *f == fd))
    }

    /// Number of connect steps made for `fd`.
    pub fn connect_count(&self, fd: RawFd) -> usize {
        self.count(|call| matches!(call, LabCall::Connect { fd: f, .. } if *f == fd))
    }

    /// Timeouts passed to every wait so far.
    pub fn wait_timeouts(&self) -> Vec<Option<Duration>> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                LabCall::Wait { timeout } => Some(*timeout),
                _ => None,
            })
            .collect()
    }

    /// Forgets the recorded call log.
    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    fn count(&self, pred: impl Fn(&LabCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }
}
