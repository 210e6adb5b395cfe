//! The selector facade.
//!
//! [`Selector`] owns every registration. It keeps two lists:
//! - descriptors whose non-blocking connect is still in progress, retried at
//!   the start of each [`poll`](Selector::poll) and invisible to the backend,
//! - descriptors registered with the backend.
//!
//! Several registrations may share one fd (e.g. two listeners on the same
//! socket). The backend sees one registration per fd whose mode is the union
//! of its watchers' modes; the fd table maps each fd back to its watchers.
//!
//! Listener callbacks may re-enter the selector. No internal borrow is held
//! while a callback runs, and every record is kept alive by a cloned `Rc`
//! for the duration of its dispatch.

mod builder;
mod list;
mod watched;

pub use builder::SelectorBuilder;

use crate::Mode;
use crate::backend::{Backend, ConnectStatus, Event, Token};
use crate::error::SelectorError;
use crate::listener::{Listener, listener_key};

use list::WatchList;
use watched::{Membership, Watched};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace, warn};

/// Backend registration of one fd.
struct FdEntry {
    /// Token the fd is registered under.
    token: Token,

    /// Union of the watchers' modes, as last sent to the backend.
    mode: Mode,

    /// Slots (in the watched list) of the records on this fd.
    slots: Vec<usize>,
}

struct Inner {
    connecting: WatchList,
    watched: WatchList,
    fds: HashMap<RawFd, FdEntry>,
    next_token: u64,
}

impl Inner {
    /// Union of the modes of the live records on `fd`.
    fn union_mode(&self, entry: &FdEntry) -> Mode {
        entry
            .slots
            .iter()
            .filter_map(|slot| self.watched.get(*slot))
            .fold(Mode::NONE, |acc, w| acc | w.mode())
    }
}

/// A single-threaded I/O readiness selector.
///
/// See the [crate documentation](crate) for an overview.
///
/// A `Selector` is neither `Send` nor `Sync`: every operation, and every
/// listener callback, happens on the thread that owns it.
pub struct Selector {
    inner: RefCell<Inner>,
    backend: RefCell<Box<dyn Backend>>,

    /// Reusable event buffer, taken out for the duration of a wait.
    events: RefCell<Vec<Event>>,

    connect_retry_interval: Duration,

    /// Set while `poll` is running.
    polling: Cell<bool>,
}

/// Resets the polling flag when a poll ends, including by unwinding.
struct PollGuard<'a>(&'a Cell<bool>);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Selector {
    /// Creates a selector on the best backend for this platform.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::Create`] if the OS refused to create the
    /// multiplexer instance.
    pub fn new() -> Result<Self, SelectorError> {
        SelectorBuilder::new().build()
    }

    /// Creates a selector on top of `backend` with default settings.
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        SelectorBuilder::new().build_with(backend)
    }

    /// Returns a builder for custom configuration.
    pub fn builder() -> SelectorBuilder {
        SelectorBuilder::new()
    }

    pub(crate) fn from_parts(
        backend: Box<dyn Backend>,
        event_capacity: usize,
        connect_retry_interval: Duration,
    ) -> Self {
        debug!(backend = backend.name(), "selector created");

        Self {
            inner: RefCell::new(Inner {
                connecting: WatchList::new(Membership::Connecting),
                watched: WatchList::new(Membership::Watched),
                fds: HashMap::new(),
                next_token: 0,
            }),
            backend: RefCell::new(backend),
            events: RefCell::new(Vec::with_capacity(event_capacity)),
            connect_retry_interval,
            polling: Cell::new(false),
        }
    }

    /// Name of the backend in use (`"epoll"`, `"kqueue"`, `"poll"`, ...).
    pub fn backend_name(&self) -> &'static str {
        self.backend.borrow().name()
    }

    /// Starts watching `fd` for `mode` on behalf of `listener`.
    ///
    /// Without `connect_to`, the descriptor is registered with the backend
    /// right away. With it, one non-blocking `connect(2)` is attempted:
    ///
    /// - if it completes, the descriptor is registered and
    ///   [`Listener::on_connected`] is called before this returns;
    /// - if it is still in progress, the descriptor is parked until a later
    ///   [`poll`](Self::poll) sees the connect complete;
    /// - if it fails, [`Listener::on_error`] is called with the native error
    ///   code before this returns, and the descriptor is forgotten.
    ///
    /// Callers must therefore be ready to be called back from inside
    /// `watch`.
    ///
    /// # Errors
    ///
    /// - [`SelectorError::NoMemory`] if bookkeeping could not be allocated;
    ///   nothing is committed and no connect is attempted.
    /// - [`SelectorError::Register`] if the backend rejected the descriptor.
    /// - [`SelectorError::InvalidDescriptor`] for a negative `fd`.
    pub fn watch<L>(
        &self,
        fd: RawFd,
        mode: Mode,
        listener: &Rc<L>,
        connect_to: Option<SocketAddr>,
    ) -> Result<(), SelectorError>
    where
        L: Listener + 'static,
    {
        if fd < 0 {
            debug_assert!(fd >= 0, "watch() called with invalid descriptor {fd}");
            return Err(SelectorError::InvalidDescriptor { fd });
        }

        let listener: Rc<dyn Listener> = listener.clone();
        let watched = Rc::new(Watched::new(
            fd,
            mode,
            Rc::downgrade(&listener),
            connect_to,
        ));
        drop(listener);

        {
            let mut inner = self.inner.borrow_mut();
            let oom = |_| SelectorError::NoMemory { fd };
            inner.watched.reserve().map_err(oom)?;
            inner.connecting.reserve().map_err(oom)?;
            inner.fds.try_reserve(1).map_err(oom)?;
        }

        let Some(addr) = connect_to else {
            self.attach(&watched)?;
            debug!(fd, ?mode, "watching");
            return Ok(());
        };

        let status = self.backend.borrow_mut().connect(fd, &addr);
        match status {
            ConnectStatus::Connected => {
                watched.clear_connect();
                self.attach(&watched)?;
                debug!(fd, ?mode, %addr, "connected immediately");
                self.notify_connected(&watched);
            }
            ConnectStatus::InProgress => {
                self.inner
                    .borrow_mut()
                    .connecting
                    .insert(watched)
                    .map_err(|_| SelectorError::NoMemory { fd })?;
                debug!(fd, ?mode, %addr, "connect in progress");
            }
            ConnectStatus::Failed(errno) => {
                debug!(fd, %addr, errno, "connect failed");
                self.fail(&watched, errno);
            }
        }

        Ok(())
    }

    /// Stops watching every descriptor of `listener`, or only `fd` if given.
    ///
    /// Takes effect immediately: the descriptor leaves its list, the backend
    /// stops reporting it, and events already collected for it in the current
    /// batch are skipped. Safe to call from inside any callback, including
    /// one for the descriptor being detached.
    ///
    /// Never calls back into the listener.
    pub fn detach<L>(&self, listener: &L, fd: Option<RawFd>)
    where
        L: Listener + ?Sized,
    {
        let owner = listener_key(listener);
        let mut inner = self.inner.borrow_mut();

        let mut matches = inner.connecting.matching(owner, fd);
        matches.extend(inner.watched.matching(owner, fd));

        for watched in matches {
            debug!(fd = watched.fd(), "detaching");
            self.release(&mut inner, &watched);
        }
    }

    /// Changes the interest of `listener`'s descriptors (only `fd`, if
    /// given) to `mode`.
    ///
    /// Descriptors already in `mode` are left alone, and the backend is only
    /// updated when the aggregated interest of an fd actually changes, so
    /// repeating a call is free. Connecting descriptors just remember the
    /// new mode for when they connect.
    ///
    /// # Errors
    ///
    /// [`SelectorError::Register`] if the backend rejected the update. The
    /// call then has no effect: every record keeps its previous mode, and
    /// descriptors already updated by this call are put back.
    pub fn set_mode<L>(
        &self,
        listener: &L,
        fd: Option<RawFd>,
        mode: Mode,
    ) -> Result<(), SelectorError>
    where
        L: Listener + ?Sized,
    {
        let owner = listener_key(listener);
        let mut inner = self.inner.borrow_mut();

        let mut touched: Vec<RawFd> = Vec::new();
        let mut changed: Vec<(Rc<Watched>, Mode)> = Vec::new();
        for watched in inner.watched.matching(owner, fd) {
            if !touched.contains(&watched.fd()) {
                touched.push(watched.fd());
            }

            let previous = watched.mode();
            if previous != mode {
                watched.set_mode(mode);
                changed.push((watched, previous));
            }
        }

        // Unchanged records are refreshed too, so a backend left behind by an
        // earlier failure catches up.
        for (i, target) in touched.iter().copied().enumerate() {
            let Err(source) = self.refresh(&mut inner, target) else {
                continue;
            };

            for (watched, previous) in &changed {
                watched.set_mode(*previous);
            }
            for applied in touched[..i].iter().copied() {
                if let Err(err) = self.refresh(&mut inner, applied) {
                    warn!(fd = applied, error = %err, "restoring interest failed");
                }
            }

            return Err(SelectorError::Register { fd: target, source });
        }

        for watched in inner.connecting.matching(owner, fd) {
            watched.set_mode(mode);
        }

        trace!(?fd, ?mode, "mode changed");
        Ok(())
    }

    /// Waits for readiness and dispatches callbacks.
    ///
    /// 1. Pending connects are retried. Completed ones are registered and get
    ///    [`Listener::on_connected`]; failed ones get [`Listener::on_error`]
    ///    and are forgotten.
    /// 2. The backend waits for up to `timeout`: `None` blocks until
    ///    something happens, `Some(Duration::ZERO)` only collects what is
    ///    already ready. While connects are pending the wait is capped by the
    ///    configured retry interval. An interrupted wait counts as no events.
    /// 3. Each reported descriptor gets, in this order and at most once each,
    ///    write readiness, read readiness, and an error notification, as far
    ///    as its current mode and the reported flags allow.
    ///
    /// Returns `true` if any connect completed or failed, or any callback
    /// was delivered.
    ///
    /// Calling `poll` from inside a callback is not supported and returns
    /// `false`.
    pub fn poll(&self, timeout: Option<Duration>) -> bool {
        if self.polling.replace(true) {
            debug_assert!(false, "poll() called from inside a callback");
            return false;
        }
        let _guard = PollGuard(&self.polling);

        let (mut progressed, connected) = self.retry_connects();

        let timeout = if self.inner.borrow().connecting.is_empty() {
            timeout
        } else {
            let cap = self.connect_retry_interval;
            Some(timeout.map_or(cap, |t| t.min(cap)))
        };

        let mut events = self.events.take();
        let waited = self.backend.borrow_mut().wait(&mut events, timeout);

        if let Err(err) = waited {
            warn!(backend = self.backend_name(), error = %err, "wait failed");
            *self.events.borrow_mut() = events;
            return progressed;
        }

        let batch = self.resolve(&events);
        events.clear();
        *self.events.borrow_mut() = events;

        for (watched, event) in &batch {
            let just_connected = connected.iter().any(|c| Rc::ptr_eq(c, watched));
            progressed |= self.dispatch(watched, event, just_connected);
        }

        progressed
    }

    /// Tears everything down.
    ///
    /// Every descriptor still attached is unregistered and its listener gets
    /// [`Listener::on_detach`] exactly once. The selector stays usable
    /// afterwards. Called automatically on drop.
    pub fn shutdown(&self) {
        let remaining = {
            let mut inner = self.inner.borrow_mut();
            let mut backend = self.backend.borrow_mut();

            for (fd, entry) in inner.fds.drain() {
                if let Err(err) = backend.unregister(fd, entry.token) {
                    debug!(fd, error = %err, "unregister during shutdown failed");
                }
            }

            let mut remaining = inner.connecting.drain();
            remaining.extend(inner.watched.drain());
            remaining
        };

        if !remaining.is_empty() {
            debug!(count = remaining.len(), "shutting down with attached descriptors");
        }

        for watched in remaining {
            let listener = watched.listener();
            watched.deactivate();
            if let Some(listener) = listener {
                listener.on_detach(watched.fd());
            }
        }
    }

    /// Returns `true` if `listener` has a registered (connected) record on
    /// `fd`.
    pub fn is_watching<L>(&self, listener: &L, fd: RawFd) -> bool
    where
        L: Listener + ?Sized,
    {
        let owner = listener_key(listener);
        !self.inner.borrow().watched.matching(owner, Some(fd)).is_empty()
    }

    /// Returns `true` if `listener` has a record on `fd` whose connect is
    /// still in progress.
    pub fn is_connecting<L>(&self, listener: &L, fd: RawFd) -> bool
    where
        L: Listener + ?Sized,
    {
        let owner = listener_key(listener);
        !self
            .inner
            .borrow()
            .connecting
            .matching(owner, Some(fd))
            .is_empty()
    }

    /// Number of records, connecting or registered.
    pub fn len(&self) -> usize {
        let inner = self.inner.borrow();
        inner.connecting.len() + inner.watched.len()
    }

    /// Returns `true` if nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `watched` with the backend and moves it to the watched list.
    fn attach(&self, watched: &Rc<Watched>) -> Result<(), SelectorError> {
        let fd = watched.fd();
        let mut inner = self.inner.borrow_mut();

        let oom = |_| SelectorError::NoMemory { fd };
        inner.watched.reserve().map_err(oom)?;
        inner.fds.try_reserve(1).map_err(oom)?;

        let (token, existing, previous) = match inner.fds.get(&fd) {
            Some(entry) => (entry.token, true, entry.mode),
            None => (Token(inner.next_token), false, Mode::NONE),
        };
        let union = previous | watched.mode();

        if !existing || union != previous {
            self.backend
                .borrow_mut()
                .register(fd, token, union, existing)
                .map_err(|source| SelectorError::Register { fd, source })?;
        }

        let slot = inner.watched.insert(watched.clone()).map_err(oom)?;
        watched.set_registered(true);

        if !existing {
            inner.next_token += 1;
        }
        let entry = inner.fds.entry(fd).or_insert_with(|| FdEntry {
            token,
            mode: Mode::NONE,
            slots: Vec::new(),
        });
        entry.mode = union;
        entry.slots.push(slot);

        Ok(())
    }

    /// Removes `watched` from whichever list holds it and deactivates it.
    fn release(&self, inner: &mut Inner, watched: &Rc<Watched>) {
        match watched.state() {
            Membership::Connecting => {
                inner.connecting.remove(watched);
            }
            Membership::Watched => {
                let slot = watched.slot();
                let registered = watched.is_registered();
                inner.watched.remove(watched);
                if registered {
                    self.withdraw(inner, watched.fd(), slot);
                }
            }
            Membership::Detached => {}
        }

        watched.deactivate();
    }

    /// Drops `slot` from the registration of `fd`, unregistering the fd once
    /// nobody is left on it.
    fn withdraw(&self, inner: &mut Inner, fd: RawFd, slot: usize) {
        let Some(entry) = inner.fds.get_mut(&fd) else {
            return;
        };
        entry.slots.retain(|s| *s != slot);

        if entry.slots.is_empty() {
            let token = entry.token;
            inner.fds.remove(&fd);

            if let Err(err) = self.backend.borrow_mut().unregister(fd, token) {
                // The descriptor was closed before being detached.
                debug_assert!(false, "failed to unregister fd {fd}: {err}");
                debug!(fd, error = %err, "unregister failed");
            }
            return;
        }

        if let Err(err) = self.refresh(inner, fd) {
            warn!(fd, error = %err, "narrowing interest failed");
        }
    }

    /// Re-sends the union mode of `fd` to the backend if it changed.
    fn refresh(&self, inner: &mut Inner, fd: RawFd) -> std::io::Result<()> {
        let Some(entry) = inner.fds.get(&fd) else {
            return Ok(());
        };

        let union = inner.union_mode(entry);
        if union == entry.mode {
            return Ok(());
        }

        let token = entry.token;
        self.backend.borrow_mut().register(fd, token, union, true)?;

        if let Some(entry) = inner.fds.get_mut(&fd) {
            entry.mode = union;
        }
        Ok(())
    }

    /// Retries every pending connect.
    ///
    /// Returns whether anything happened, and the records that connected
    /// (they already got their write notification this round).
    fn retry_connects(&self) -> (bool, Vec<Rc<Watched>>) {
        let mut progressed = false;
        let mut connected = Vec::new();

        let pending = self.inner.borrow().connecting.snapshot();

        for watched in pending {
            // An earlier callback in this loop may have detached it.
            if !watched.is_active() || !self.inner.borrow().connecting.contains(&watched) {
                continue;
            }
            let Some(addr) = watched.connect_to() else {
                continue;
            };

            let fd = watched.fd();
            let status = self.backend.borrow_mut().connect(fd, &addr);

            match status {
                ConnectStatus::InProgress => {}
                ConnectStatus::Connected => {
                    self.inner.borrow_mut().connecting.remove(&watched);
                    watched.clear_connect();
                    progressed = true;

                    match self.attach(&watched) {
                        Ok(()) => {
                            debug!(fd, %addr, "connected");
                            connected.push(watched.clone());
                            self.notify_connected(&watched);
                        }
                        Err(err) => {
                            warn!(fd, error = %err, "registering connected descriptor failed");
                            self.fail(&watched, errno_of(&err));
                        }
                    }
                }
                ConnectStatus::Failed(errno) => {
                    self.inner.borrow_mut().connecting.remove(&watched);
                    progressed = true;
                    debug!(fd, %addr, errno, "connect failed");
                    self.fail(&watched, errno);
                }
            }
        }

        (progressed, connected)
    }

    /// Maps every event to the live records on its fd.
    ///
    /// All records of the batch are cloned here, before any callback runs,
    /// so a callback detaching a record cannot free one that a later event
    /// of the same batch still refers to.
    ///
    /// A hangup without an error code gets the socket's pending error here,
    /// once per event, since reading it clears it.
    fn resolve(&self, events: &[Event]) -> Vec<(Rc<Watched>, Event)> {
        let inner = self.inner.borrow();
        let mut batch = Vec::with_capacity(events.len());

        for event in events {
            let Some(entry) = inner.fds.get(&event.fd) else {
                trace!(fd = event.fd, "dropping event for untracked descriptor");
                continue;
            };

            if event.token.is_some_and(|token| token != entry.token) {
                trace!(fd = event.fd, "dropping event for stale registration");
                continue;
            }

            let mut event = *event;
            if event.hangup && event.error.is_none() {
                event.error = Some(self.backend.borrow_mut().pending_error(event.fd));
            }

            for slot in &entry.slots {
                if let Some(watched) = inner.watched.get(*slot) {
                    if watched.is_active() {
                        batch.push((watched.clone(), event));
                    }
                }
            }
        }

        batch
    }

    /// Delivers one event to one record. Returns whether any callback ran.
    fn dispatch(&self, watched: &Rc<Watched>, event: &Event, just_connected: bool) -> bool {
        let fd = watched.fd();
        let mut delivered = false;

        trace!(
            fd,
            readable = event.readable,
            writable = event.writable,
            hangup = event.hangup,
            error = ?event.error,
            "dispatching"
        );

        if event.writable && watched.mode().is_write() && !just_connected {
            if let Some(listener) = watched.listener() {
                listener.on_write_ready(self, fd);
                delivered = true;
            }
        }

        if (event.readable || event.hangup) && watched.mode().is_read() {
            if let Some(listener) = watched.listener() {
                listener.on_read_ready(self, fd);
                delivered = true;
            }
        }

        if let Some(errno) = event.error {
            if let Some(listener) = watched.listener() {
                listener.on_error(self, fd, errno);
                delivered = true;
            }
        }

        delivered
    }

    fn notify_connected(&self, watched: &Rc<Watched>) {
        if let Some(listener) = watched.listener() {
            listener.on_connected(self, watched.fd());
        }
    }

    /// Forgets `watched` (already out of every list) and reports `errno`.
    fn fail(&self, watched: &Rc<Watched>, errno: i32) {
        let listener = watched.listener();
        watched.deactivate();

        if let Some(listener) = listener {
            listener.on_error(self, watched.fd(), errno);
        }
    }
}

fn errno_of(err: &SelectorError) -> i32 {
    match err {
        SelectorError::Register { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
        SelectorError::NoMemory { .. } => libc::ENOMEM,
        SelectorError::InvalidDescriptor { .. } => libc::EBADF,
        _ => libc::EIO,
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LabBackend, LabHandle};

    type Log = Rc<RefCell<Vec<String>>>;

    struct Probe {
        name: &'static str,
        log: Log,
        detach_self: Cell<bool>,
        victim: RefCell<Option<Rc<Probe>>>,
    }

    impl Probe {
        fn new(name: &'static str, log: &Log) -> Rc<Self> {
            Rc::new(Self {
                name,
                log: log.clone(),
                detach_self: Cell::new(false),
                victim: RefCell::new(None),
            })
        }
    }

    impl Listener for Probe {
        fn on_read_ready(&self, selector: &Selector, fd: RawFd) {
            self.log.borrow_mut().push(format!("{} read {fd}", self.name));

            if self.detach_self.get() {
                selector.detach(self, Some(fd));
            }
            if let Some(victim) = self.victim.borrow_mut().take() {
                selector.detach(&*victim, None);
            }
        }

        fn on_write_ready(&self, _: &Selector, fd: RawFd) {
            self.log.borrow_mut().push(format!("{} write {fd}", self.name));
        }

        fn on_error(&self, _: &Selector, fd: RawFd, errno: i32) {
            self.log
                .borrow_mut()
                .push(format!("{} error {fd} {errno}", self.name));
        }
    }

    fn lab() -> (Selector, LabHandle) {
        let backend = LabBackend::default();
        let handle = backend.handle();
        (Selector::with_backend(Box::new(backend)), handle)
    }

    fn records(selector: &Selector) -> Vec<Rc<Watched>> {
        selector.inner.borrow().watched.snapshot()
    }

    #[test]
    fn self_detach_frees_record_after_dispatch() {
        let log = Log::default();
        let (selector, lab) = lab();
        let probe = Probe::new("a", &log);
        probe.detach_self.set(true);

        selector.watch(5, Mode::READ, &probe, None).unwrap();
        let held = records(&selector);
        assert_eq!(Rc::strong_count(&held[0]), 2);

        lab.readable(5);
        assert!(selector.poll(Some(Duration::ZERO)));

        assert!(selector.is_empty());
        assert!(!held[0].is_active());
        assert_eq!(Rc::strong_count(&held[0]), 1);
        assert_eq!(lab.unregister_count(5), 1);
    }

    #[test]
    fn record_detached_mid_batch_is_skipped_but_alive() {
        let log = Log::default();
        let (selector, lab) = lab();
        let a = Probe::new("a", &log);
        let b = Probe::new("b", &log);
        *a.victim.borrow_mut() = Some(b.clone());

        selector.watch(5, Mode::READ, &a, None).unwrap();
        selector.watch(6, Mode::READ, &b, None).unwrap();
        let held = records(&selector);

        lab.readable(5);
        lab.readable(6);
        assert!(selector.poll(Some(Duration::ZERO)));

        assert_eq!(*log.borrow(), vec!["a read 5".to_string()]);
        assert_eq!(Rc::strong_count(&held[0]), 2);
        assert_eq!(Rc::strong_count(&held[1]), 1);
        assert!(!held[1].is_active());
        assert_eq!(selector.len(), 1);
    }

    #[test]
    fn shared_descriptor_registers_the_union() {
        let log = Log::default();
        let (selector, lab) = lab();
        let reader = Probe::new("r", &log);
        let writer = Probe::new("w", &log);

        selector.watch(7, Mode::READ, &reader, None).unwrap();
        selector.watch(7, Mode::WRITE, &writer, None).unwrap();

        {
            let inner = selector.inner.borrow();
            let entry = &inner.fds[&7];
            assert_eq!(entry.mode, Mode::READ_WRITE);
            assert_eq!(entry.slots.len(), 2);
        }
        assert_eq!(lab.registered_mode(7), Some(Mode::READ_WRITE));

        selector.detach(&*writer, None);
        assert_eq!(lab.registered_mode(7), Some(Mode::READ));
        assert_eq!(lab.unregister_count(7), 0);

        selector.detach(&*reader, Some(7));
        assert!(selector.inner.borrow().fds.is_empty());
        assert_eq!(lab.unregister_count(7), 1);
    }

    #[test]
    fn tokens_are_never_reused() {
        let log = Log::default();
        let (selector, lab) = lab();
        let probe = Probe::new("a", &log);

        selector.watch(5, Mode::READ, &probe, None).unwrap();
        let first = lab.registered_token(5).unwrap();
        selector.detach(&*probe, None);

        selector.watch(5, Mode::READ, &probe, None).unwrap();
        let second = lab.registered_token(5).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn stale_token_is_dropped() {
        let log = Log::default();
        let (selector, lab) = lab();
        let probe = Probe::new("a", &log);
        selector.watch(5, Mode::READ, &probe, None).unwrap();

        let mut event = Event::new(5, Some(Token(u64::MAX)));
        event.readable = true;
        lab.inject(event);

        assert!(!selector.poll(Some(Duration::ZERO)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn poll_flag_resets() {
        let (selector, _lab) = lab();
        assert!(!selector.poll(Some(Duration::ZERO)));
        assert!(!selector.polling.get());
    }
}
