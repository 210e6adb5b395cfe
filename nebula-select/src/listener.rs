use crate::Selector;

use std::os::fd::RawFd;

/// Callbacks delivered by a [`Selector`].
///
/// Listeners are implemented by the networking code that owns the
/// descriptors. Every callback receives the selector that dispatched it so the
/// listener can re-enter it: calling [`Selector::watch`],
/// [`Selector::detach`] or [`Selector::set_mode`] from inside a callback is
/// allowed, including detaching the very descriptor being dispatched.
///
/// Callbacks take `&self`; listeners keep their mutable state behind `Cell`
/// or `RefCell`, as the selector itself does.
///
/// The selector only keeps a weak reference to a listener. Detach it before
/// dropping it; a listener dropped while still attached is skipped silently.
pub trait Listener {
    /// The descriptor has data to read, or reached EOF / hangup.
    fn on_read_ready(&self, selector: &Selector, fd: RawFd) {
        let _ = (selector, fd);
    }

    /// The descriptor can accept a write.
    fn on_write_ready(&self, selector: &Selector, fd: RawFd) {
        let _ = (selector, fd);
    }

    /// A connect started by [`Selector::watch`] has completed.
    ///
    /// Completion is write readiness, so the default forwards to
    /// [`on_write_ready`](Self::on_write_ready).
    fn on_connected(&self, selector: &Selector, fd: RawFd) {
        self.on_write_ready(selector, fd);
    }

    /// A hard OS-level error, including a failed connect.
    ///
    /// `errno` is the native error code, passed through unmodified.
    fn on_error(&self, selector: &Selector, fd: RawFd, errno: i32) {
        let _ = (selector, fd, errno);
    }

    /// The selector is shutting down while `fd` is still attached.
    ///
    /// Fired exactly once per remaining descriptor during
    /// [`Selector::shutdown`], never as a result of [`Selector::detach`].
    fn on_detach(&self, fd: RawFd) {
        let _ = fd;
    }
}

/// Identity of a listener: the address of its data.
pub(crate) fn listener_key<L: Listener + ?Sized>(listener: &L) -> *const () {
    listener as *const L as *const ()
}
