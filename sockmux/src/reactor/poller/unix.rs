//! Thin `libc` wrappers used by the poller and the reactor.
//!
//! Every wrapper converts the C return convention into an
//! [`io::Result`], capturing `errno` immediately after the call.

use libc::{
    AF_INET, AF_INET6, F_GETFL, F_SETFL, FD_CLOEXEC, F_SETFD, IPPROTO_TCP, O_NONBLOCK,
    SO_ERROR, SO_KEEPALIVE, SO_REUSEADDR, SOL_SOCKET, TCP_NODELAY, c_int, sockaddr,
    sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::{io, mem};

fn cvt(rc: c_int) -> io::Result<c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn cvt_size(rc: isize) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Reads from a non-blocking descriptor.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) })
}

/// Writes to a non-blocking descriptor.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::write(fd, buffer.as_ptr() as *const _, buffer.len()) })
}

/// Writes to a stream descriptor without raising `SIGPIPE`.
///
/// Inherited descriptors (pipes, ttys) are not sockets; for those the call
/// falls back to a plain `write(2)`.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let flags = libc::MSG_NOSIGNAL;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let flags = 0;

    let rc = unsafe { libc::send(fd, buffer.as_ptr() as *const _, buffer.len(), flags) };
    match cvt_size(rc) {
        Err(e) if e.raw_os_error() == Some(libc::ENOTSOCK) => sys_write(fd, buffer),
        other => other,
    }
}

/// Closes a descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

/// Sets a descriptor to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, F_GETFL) })?;
    if flags & O_NONBLOCK == 0 {
        cvt(unsafe { libc::fcntl(fd, F_SETFL, flags | O_NONBLOCK) })?;
    }
    Ok(())
}

fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    cvt(unsafe { libc::fcntl(fd, F_SETFD, FD_CLOEXEC) }).map(drop)
}

/// Returns the address family matching a socket address.
pub(crate) fn domain_of(addr: &SocketAddr) -> c_int {
    match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    }
}

/// Creates a non-blocking, close-on-exec socket.
pub(crate) fn sys_socket(domain: c_int, ty: c_int) -> io::Result<RawFd> {
    let fd = cvt(unsafe { libc::socket(domain, ty, 0) })?;

    let setup = sys_set_nonblocking(fd)
        .and_then(|_| sys_set_cloexec(fd))
        .and_then(|_| sys_set_nosigpipe(fd));
    if let Err(e) = setup {
        sys_close(fd);
        return Err(e);
    }

    Ok(fd)
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn sys_set_nosigpipe(fd: RawFd) -> io::Result<()> {
    sys_setsockopt(fd, SOL_SOCKET, libc::SO_NOSIGPIPE, 1)
}

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
fn sys_set_nosigpipe(_fd: RawFd) -> io::Result<()> {
    Ok(())
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    cvt(unsafe { libc::bind(fd, &storage as *const _ as *const sockaddr, len) }).map(drop)
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    cvt(unsafe { libc::listen(fd, backlog) }).map(drop)
}

/// Accepts a new incoming connection.
///
/// The returned client socket is already non-blocking.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client = cvt(unsafe {
        libc::accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len)
    })?;

    let setup = sys_set_nonblocking(client)
        .and_then(|_| sys_set_cloexec(client))
        .and_then(|_| sys_set_nosigpipe(client));
    if let Err(e) = setup {
        sys_close(client);
        return Err(e);
    }

    match sockaddr_storage_to_socketaddr(&storage) {
        Ok(addr) => Ok((client, addr)),
        Err(e) => {
            sys_close(client);
            Err(e)
        }
    }
}

/// Initiates a connection. On a non-blocking socket this usually fails
/// with `EINPROGRESS`.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    cvt(unsafe { libc::connect(fd, &storage as *const _ as *const sockaddr, len) }).map(drop)
}

/// Reads and clears the pending socket error (`SO_ERROR`).
pub(crate) fn sys_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut code: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    cvt(unsafe {
        libc::getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut code as *mut _ as *mut _,
            &mut len,
        )
    })?;

    Ok((code != 0).then(|| io::Error::from_raw_os_error(code)))
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt(unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    sockaddr_storage_to_socketaddr(&storage)
}

/// Returns the remote address of a connected socket.
pub(crate) fn sys_peername(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt(unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    sockaddr_storage_to_socketaddr(&storage)
}

/// Sends one datagram.
pub(crate) fn sys_sendto(fd: RawFd, buffer: &[u8], addr: &SocketAddr) -> io::Result<usize> {
    let (storage, len) = socketaddr_to_storage(addr);
    cvt_size(unsafe {
        libc::sendto(
            fd,
            buffer.as_ptr() as *const _,
            buffer.len(),
            0,
            &storage as *const _ as *const sockaddr,
            len,
        )
    })
}

/// Receives one datagram and the address of its sender.
pub(crate) fn sys_recvfrom(fd: RawFd, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let n = cvt_size(unsafe {
        libc::recvfrom(
            fd,
            buffer.as_mut_ptr() as *mut _,
            buffer.len(),
            0,
            &mut storage as *mut _ as *mut sockaddr,
            &mut len,
        )
    })?;

    Ok((n, sockaddr_storage_to_socketaddr(&storage)?))
}

/// Creates a non-blocking pipe, returning `(read, write)`.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as c_int; 2];
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;

    for &fd in &fds {
        if let Err(e) = sys_set_nonblocking(fd).and_then(|_| sys_set_cloexec(fd)) {
            sys_close(fds[0]);
            sys_close(fds[1]);
            return Err(e);
        }
    }

    Ok((fds[0], fds[1]))
}

fn sys_setsockopt(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    cvt(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    })
    .map(drop)
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    sys_setsockopt(fd, SOL_SOCKET, SO_REUSEADDR, 1)
}

/// Enables `SO_KEEPALIVE` on a socket.
pub(crate) fn sys_set_keepalive(fd: RawFd) -> io::Result<()> {
    sys_setsockopt(fd, SOL_SOCKET, SO_KEEPALIVE, 1)
}

/// Sets `TCP_NODELAY`.
pub(crate) fn sys_set_nodelay(fd: RawFd, nodelay: bool) -> io::Result<()> {
    sys_setsockopt(fd, IPPROTO_TCP, TCP_NODELAY, nodelay as c_int)
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
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
    fn sockaddr_conversion_preserves_v4_and_v6() {
        for text in ["127.0.0.1:8080", "[::1]:443", "[fe80::1]:53"] {
            let addr: SocketAddr = text.parse().unwrap();
            let (storage, _) = socketaddr_to_storage(&addr);
            assert_eq!(sockaddr_storage_to_socketaddr(&storage).unwrap(), addr);
        }
    }

    #[test]
    fn pipe_round_trip() {
        let (r, w) = sys_pipe().unwrap();
        assert_eq!(sys_write(w, b"ping").unwrap(), 4);

        let mut buf = [0u8; 8];
        assert_eq!(sys_read(r, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");

        let err = sys_read(r, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        sys_close(r);
        sys_close(w);
    }
}
