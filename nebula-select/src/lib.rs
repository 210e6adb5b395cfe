//! # nebula-select
//!
//! **nebula-select** is the I/O readiness layer of the **Nebula** networking
//! stack: a single-threaded selector that watches externally owned
//! descriptors and calls back into their owners when they become readable,
//! writable, connected or broken.
//!
//! It is deliberately small. There is no executor, no futures and no
//! buffering; higher layers (connections, servers, protocol handlers) sit on
//! top of it and implement [`Listener`].
//!
//! - A single [`Selector`] API over **epoll** (Linux), **kqueue** (macOS and
//!   the BSDs) and a portable **poll(2)** fallback
//! - **Non-blocking connects** driven to completion by the selector itself
//! - **Re-entrant callbacks**: listeners may watch, detach and change
//!   interest from inside any callback, including detaching themselves
//! - A deterministic [`backend::LabBackend`] for testing code built on top
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nebula_select::{Listener, Mode, Selector};
//! use std::net::UdpSocket;
//! use std::os::fd::{AsRawFd, RawFd};
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! struct Echo;
//!
//! impl Listener for Echo {
//!     fn on_read_ready(&self, selector: &Selector, fd: RawFd) {
//!         println!("fd {fd} is readable");
//!         selector.detach(self, Some(fd));
//!     }
//! }
//!
//! let socket = UdpSocket::bind("127.0.0.1:0")?;
//! socket.set_nonblocking(true)?;
//!
//! let selector = Selector::new()?;
//! let echo = Rc::new(Echo);
//! selector.watch(socket.as_raw_fd(), Mode::READ, &echo, None)?;
//!
//! while !selector.is_empty() {
//!     selector.poll(Some(Duration::from_millis(100)));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Modules
//!
//! - [`backend`]: OS readiness facilities and the lab backend
//!
//! ## Descriptor ownership
//!
//! The selector never opens or closes descriptors. Detach a descriptor
//! before closing it: closing first leaves a stale registration behind on
//! backends that track descriptors by number.
//!
//! ## Threading
//!
//! A [`Selector`] is bound to the thread that created it. Run one selector
//! per thread if several threads need to multiplex I/O.

#[cfg(not(unix))]
compile_error!("nebula-select only supports unix platforms");

mod error;
mod listener;
mod mode;
mod selector;
mod utils;

pub mod backend;

pub use backend::BackendKind;
pub use error::SelectorError;
pub use listener::Listener;
pub use mode::Mode;
pub use selector::{Selector, SelectorBuilder};
