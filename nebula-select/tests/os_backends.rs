mod common;

use common::{Call, Recorder, init_tracing};
use nebula_select::{BackendKind, Mode, Selector, SelectorBuilder};

use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

/// One selector per backend available on this platform.
fn selectors() -> Vec<Selector> {
    init_tracing();

    [BackendKind::Auto, BackendKind::Poll]
        .into_iter()
        .map(|kind| {
            SelectorBuilder::new()
                .backend(kind)
                .build()
                .expect("Failed to build selector")
        })
        .collect()
}

fn poll_until(selector: &Selector, listener: &Recorder) {
    for _ in 0..100 {
        selector.poll(Some(Duration::from_millis(20)));
        if !listener.calls().is_empty() {
            return;
        }
    }
}

fn nonblocking_tcp_socket() -> OwnedFd {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        assert!(fd >= 0, "Failed to create socket");

        let flags = libc::fcntl(fd, libc::F_GETFL);
        assert!(libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == 0);

        OwnedFd::from_raw_fd(fd)
    }
}

#[test]
fn test_native_backend_is_selected() {
    let selector = Selector::new().expect("Failed to build selector");

    let expected = match BackendKind::native() {
        BackendKind::Epoll => "epoll",
        BackendKind::Kqueue => "kqueue",
        _ => "poll",
    };
    assert_eq!(selector.backend_name(), expected);
}

#[test]
fn test_socket_becomes_readable() {
    for selector in selectors() {
        let (mut local, mut remote) = UnixStream::pair().expect("Failed to create socket pair");
        let fd = local.as_raw_fd();
        let listener = Recorder::new();

        selector
            .watch(fd, Mode::READ, &listener, None)
            .expect("Failed to watch socket");
        assert!(!selector.poll(Some(Duration::ZERO)));

        remote.write_all(b"ping").expect("Failed to write");
        poll_until(&selector, &listener);
        assert_eq!(
            listener.calls(),
            vec![Call::Read(fd)],
            "backend {}",
            selector.backend_name()
        );

        let mut buffer = [0; 4];
        local.read_exact(&mut buffer).expect("Failed to read");
        assert_eq!(&buffer, b"ping");

        selector.detach(&*listener, Some(fd));
        remote.write_all(b"pong").expect("Failed to write");
        assert!(!selector.poll(Some(Duration::from_millis(10))));
    }
}

#[test]
fn test_socket_is_writable() {
    for selector in selectors() {
        let (local, _remote) = UnixStream::pair().expect("Failed to create socket pair");
        let fd = local.as_raw_fd();
        let listener = Recorder::new();

        selector
            .watch(fd, Mode::WRITE, &listener, None)
            .expect("Failed to watch socket");
        poll_until(&selector, &listener);
        assert_eq!(listener.calls(), vec![Call::Write(fd)]);

        selector.detach(&*listener, None);
    }
}

#[test]
fn test_peer_close_reports_read_and_error() {
    for selector in selectors() {
        let (local, remote) = UnixStream::pair().expect("Failed to create socket pair");
        let fd = local.as_raw_fd();
        let listener = Recorder::new();

        selector
            .watch(fd, Mode::READ, &listener, None)
            .expect("Failed to watch socket");
        drop(remote);

        poll_until(&selector, &listener);
        let calls = listener.calls();
        assert_eq!(calls.first(), Some(&Call::Read(fd)));
        assert!(
            calls.iter().all(|c| matches!(c, Call::Read(_) | Call::Error(_, _))),
            "unexpected calls {calls:?}"
        );

        selector.detach(&*listener, None);
    }
}

#[test]
fn test_tcp_connect_completes() {
    for selector in selectors() {
        let server = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let addr = server.local_addr().expect("Failed to get local address");
        let socket = nonblocking_tcp_socket();
        let fd = socket.as_raw_fd();
        let listener = Recorder::new();

        selector
            .watch(fd, Mode::READ_WRITE, &listener, Some(addr))
            .expect("Failed to watch socket");
        poll_until(&selector, &listener);

        assert_eq!(listener.calls(), vec![Call::Write(fd)]);
        assert!(selector.is_watching(&*listener, fd));

        let (_stream, _) = server.accept().expect("Failed to accept connection");
        selector.detach(&*listener, Some(fd));
    }
}

#[test]
fn test_tcp_connect_refused() {
    for selector in selectors() {
        let addr = {
            let server = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
            server.local_addr().expect("Failed to get local address")
        };
        let socket = nonblocking_tcp_socket();
        let fd = socket.as_raw_fd();
        let listener = Recorder::new();

        selector
            .watch(fd, Mode::WRITE, &listener, Some(addr))
            .expect("Connect failures are reported through the listener");
        poll_until(&selector, &listener);

        assert_eq!(listener.calls(), vec![Call::Error(fd, libc::ECONNREFUSED)]);
        assert!(selector.is_empty());
    }
}

#[test]
fn test_zero_timeout_returns_immediately() {
    for selector in selectors() {
        let start = Instant::now();
        assert!(!selector.poll(Some(Duration::ZERO)));

        assert!(
            start.elapsed() < Duration::from_millis(50),
            "Zero timeout poll should be fast"
        );
    }
}

#[test]
fn test_timeout_is_honored() {
    for selector in selectors() {
        let (local, _remote) = UnixStream::pair().expect("Failed to create socket pair");
        let listener = Recorder::new();
        selector
            .watch(local.as_raw_fd(), Mode::READ, &listener, None)
            .expect("Failed to watch socket");

        let start = Instant::now();
        assert!(!selector.poll(Some(Duration::from_millis(50))));
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(40),
            "Poll returned early after {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_secs(1),
            "Poll overslept: {elapsed:?}"
        );

        selector.detach(&*listener, None);
    }
}
