#![allow(dead_code)]

use nebula_select::backend::{LabBackend, LabHandle};
use nebula_select::{Listener, Selector};

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;

/// A callback observed by a [`Recorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Read(RawFd),
    Write(RawFd),
    Error(RawFd, i32),
    Detach(RawFd),
}

type Hook = Box<dyn Fn(&Recorder, &Selector, RawFd)>;

/// Listener that logs every callback and can run a hook on read or write.
///
/// `on_connected` is left to its default, so a completed connect shows up
/// as [`Call::Write`].
#[derive(Default)]
pub struct Recorder {
    calls: RefCell<Vec<Call>>,
    on_read: RefCell<Option<Hook>>,
    on_write: RefCell<Option<Hook>>,
}

impl Recorder {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn when_readable(&self, hook: impl Fn(&Recorder, &Selector, RawFd) + 'static) {
        *self.on_read.borrow_mut() = Some(Box::new(hook));
    }

    pub fn when_writable(&self, hook: impl Fn(&Recorder, &Selector, RawFd) + 'static) {
        *self.on_write.borrow_mut() = Some(Box::new(hook));
    }
}

impl Listener for Recorder {
    fn on_read_ready(&self, selector: &Selector, fd: RawFd) {
        self.calls.borrow_mut().push(Call::Read(fd));
        if let Some(hook) = self.on_read.borrow().as_ref() {
            hook(self, selector, fd);
        }
    }

    fn on_write_ready(&self, selector: &Selector, fd: RawFd) {
        self.calls.borrow_mut().push(Call::Write(fd));
        if let Some(hook) = self.on_write.borrow().as_ref() {
            hook(self, selector, fd);
        }
    }

    fn on_error(&self, _selector: &Selector, fd: RawFd, errno: i32) {
        self.calls.borrow_mut().push(Call::Error(fd, errno));
    }

    fn on_detach(&self, fd: RawFd) {
        self.calls.borrow_mut().push(Call::Detach(fd));
    }
}

/// A selector on a fresh lab backend, plus the handle driving it.
pub fn lab_selector() -> (Selector, LabHandle) {
    init_tracing();

    let backend = LabBackend::default();
    let handle = backend.handle();

    (Selector::with_backend(Box::new(backend)), handle)
}

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
