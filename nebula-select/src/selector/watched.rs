use crate::Mode;
use crate::listener::Listener;

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

/// Which list a [`Watched`] currently lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Membership {
    /// Waiting for a non-blocking connect to complete. Not registered with
    /// the backend.
    Connecting,

    /// Registered with the backend.
    Watched,

    /// In no list. Terminal: the record is only kept alive by in-flight
    /// dispatch frames.
    Detached,
}

/// One registration: a descriptor, its interest and its listener.
///
/// Records are shared as `Rc<Watched>`. The list holding a record owns one
/// reference; every dispatch frame clones another one before calling into a
/// listener and drops it afterwards. A `detach` issued from inside a callback
/// therefore only removes the list's reference, and the record is freed when
/// the last dispatch frame unwinds.
pub(crate) struct Watched {
    /// Externally owned descriptor. Never closed here.
    fd: RawFd,

    /// Current interest.
    mode: Cell<Mode>,

    /// Non-owning listener reference. Cleared on deactivation.
    listener: RefCell<Option<Weak<dyn Listener>>>,

    /// Listener identity, for matching in `detach` and `set_mode`.
    owner: *const (),

    /// False once detached or torn down. No callback is dispatched after.
    active: Cell<bool>,

    /// Whether this record contributes to the backend registration of `fd`.
    registered: Cell<bool>,

    /// Target of a pending connect.
    connect_to: Cell<Option<SocketAddr>>,

    /// Current list.
    state: Cell<Membership>,

    /// Slot in the current list.
    slot: Cell<usize>,
}

impl Watched {
    pub(crate) fn new(
        fd: RawFd,
        mode: Mode,
        listener: Weak<dyn Listener>,
        connect_to: Option<SocketAddr>,
    ) -> Self {
        let owner = listener.as_ptr() as *const ();

        Self {
            fd,
            mode: Cell::new(mode),
            listener: RefCell::new(Some(listener)),
            owner,
            active: Cell::new(true),
            registered: Cell::new(false),
            connect_to: Cell::new(connect_to),
            state: Cell::new(Membership::Detached),
            slot: Cell::new(usize::MAX),
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode.get()
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        self.mode.set(mode);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    /// The listener to call, if this record is still active and the
    /// listener still exists.
    pub(crate) fn listener(&self) -> Option<Rc<dyn Listener>> {
        if !self.active.get() {
            return None;
        }

        self.listener.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// Returns `true` if this record belongs to `owner` and, when given,
    /// to `fd`.
    pub(crate) fn matches(&self, owner: *const (), fd: Option<RawFd>) -> bool {
        self.active.get() && self.owner == owner && fd.is_none_or(|fd| fd == self.fd)
    }

    /// Marks the record inactive and drops the listener reference.
    pub(crate) fn deactivate(&self) {
        self.active.set(false);
        self.registered.set(false);
        self.connect_to.set(None);
        self.listener.borrow_mut().take();
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.registered.get()
    }

    pub(crate) fn set_registered(&self, registered: bool) {
        self.registered.set(registered);
    }

    pub(crate) fn connect_to(&self) -> Option<SocketAddr> {
        self.connect_to.get()
    }

    pub(crate) fn clear_connect(&self) {
        self.connect_to.set(None);
    }

    pub(crate) fn state(&self) -> Membership {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: Membership) {
        self.state.set(state);
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot.get()
    }

    pub(crate) fn set_slot(&self, slot: usize) {
        self.slot.set(slot);
    }
}
