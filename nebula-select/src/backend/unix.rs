use libc::{
    AF_INET, AF_INET6, EAGAIN, EALREADY, EINPROGRESS, EINTR, EISCONN, EWOULDBLOCK, SO_ERROR,
    SOL_SOCKET, c_int, close, connect, getsockopt, sockaddr, sockaddr_in, sockaddr_in6,
    sockaddr_storage, socklen_t,
};
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::{io, mem};

use super::ConnectStatus;

/// Closes a file descriptor owned by a backend.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Initiates (or continues) a non-blocking connection.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);

    let rc = unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Returns the pending error of a socket (`SO_ERROR`), clearing it.
///
/// `Ok(None)` means no error is pending.
pub(crate) fn sys_get_socket_error(fd: RawFd) -> io::Result<Option<i32>> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    let rc = unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut _ as *mut _,
            &mut len,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else if err != 0 {
        Ok(Some(err))
    } else {
        Ok(None)
    }
}

/// Error code to report for an error or hangup condition on `fd`.
///
/// Prefers the socket's pending error; a hangup with nothing pending (or a
/// descriptor that is not a socket) is reported as `ECONNRESET`.
pub(crate) fn pending_error_or_reset(fd: RawFd) -> i32 {
    match sys_get_socket_error(fd) {
        Ok(Some(err)) => err,
        _ => libc::ECONNRESET,
    }
}

/// One step of a non-blocking connect on `fd`.
///
/// A failure of an earlier asynchronous attempt is picked up from
/// `SO_ERROR` first, since some systems answer a second `connect(2)` on a
/// failed socket with an unrelated code.
pub(crate) fn connect_step(fd: RawFd, addr: &SocketAddr) -> ConnectStatus {
    match sys_get_socket_error(fd) {
        Ok(Some(err)) => return ConnectStatus::Failed(err),
        Ok(None) => {}
        Err(e) => return ConnectStatus::Failed(raw_code(&e)),
    }

    match sys_connect(fd, addr) {
        Ok(()) => ConnectStatus::Connected,
        Err(e) => classify_connect_error(raw_code(&e)),
    }
}

/// Maps a `connect(2)` errno to a [`ConnectStatus`].
pub(crate) fn classify_connect_error(errno: i32) -> ConnectStatus {
    #[allow(unreachable_patterns)]
    match errno {
        EISCONN => ConnectStatus::Connected,
        EINPROGRESS | EALREADY | EINTR | EAGAIN | EWOULDBLOCK => ConnectStatus::InProgress,
        other => ConnectStatus::Failed(other),
    }
}

fn raw_code(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_errors_are_classified() {
        assert_eq!(classify_connect_error(EINPROGRESS), ConnectStatus::InProgress);
        assert_eq!(classify_connect_error(EALREADY), ConnectStatus::InProgress);
        assert_eq!(classify_connect_error(EISCONN), ConnectStatus::Connected);
        assert_eq!(
            classify_connect_error(libc::ECONNREFUSED),
            ConnectStatus::Failed(libc::ECONNREFUSED)
        );
    }

    #[test]
    fn ipv4_storage_round_trips_port() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let (storage, len) = socketaddr_to_storage(&addr);

        assert_eq!(len as usize, mem::size_of::<sockaddr_in>());
        let sa = unsafe { &*(&storage as *const _ as *const sockaddr_in) };
        assert_eq!(u16::from_be(sa.sin_port), 8080);
        assert_eq!(sa.sin_family as c_int, AF_INET);
    }

    #[test]
    fn socket_error_on_fresh_socket_is_none() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        use std::os::fd::AsRawFd;

        assert_eq!(sys_get_socket_error(listener.as_raw_fd()).unwrap(), None);
    }
}
