//! Socket helpers and socket-backed byte sources/sinks
//!
//! Thin wrappers over the libc socket calls used at startup (listen,
//! connect) and per connection (accept, non-blocking, nodelay, close).
//! Failures carry the captured errno.

use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::os::unix::io::RawFd;

use ncc_core::benchmark::{Direction, IoBenchmark};
use ncc_core::io::{ByteSink, ByteSource, IoRecord, IoStatus};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::error::{NetError, NetResult};

fn check(ret: libc::c_int) -> Result<libc::c_int, Errno> {
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret)
    }
}

fn set_int_option(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<(), Errno> {
    check(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })
    .map(drop)
}

fn to_sockaddr(addr: &SocketAddrV4) -> libc::sockaddr_in {
    let mut raw: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    raw.sin_family = libc::AF_INET as libc::sa_family_t;
    raw.sin_port = addr.port().to_be();
    raw.sin_addr.s_addr = u32::from(*addr.ip()).to_be();
    raw
}

fn from_sockaddr(raw: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(raw.sin_addr.s_addr)),
        u16::from_be(raw.sin_port),
    )
}

/// Create a non-blocking IPv4 listener on `port` (0 picks a free port).
pub fn listen(port: u16, backlog: i32) -> NetResult<RawFd> {
    let fd = check(unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) })
        .map_err(|errno| NetError::Socket { op: "socket", errno })?;

    let setup = || -> NetResult<()> {
        set_int_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
            .map_err(|errno| NetError::Socket { op: "setsockopt(SO_REUSEADDR)", errno })?;

        let addr = to_sockaddr(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        check(unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        })
        .map_err(|errno| NetError::Socket { op: "bind", errno })?;

        check(unsafe { libc::listen(fd, backlog) })
            .map_err(|errno| NetError::Socket { op: "listen", errno })?;

        set_nonblocking(fd).map_err(|errno| NetError::Socket { op: "fcntl(O_NONBLOCK)", errno })
    };

    if let Err(e) = setup() {
        let _ = close(fd);
        return Err(e);
    }
    Ok(fd)
}

/// Accept one pending connection.
///
/// Returns `EAGAIN` when the listener has nothing queued.
pub fn accept(listener: RawFd) -> Result<(RawFd, SocketAddrV4), Errno> {
    let mut raw: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let fd = check(unsafe {
        libc::accept4(
            listener,
            &mut raw as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC,
        )
    })?;
    Ok((fd, from_sockaddr(&raw)))
}

/// Resolve `host` to its first IPv4 address.
pub fn resolve(host: &str, port: u16) -> NetResult<SocketAddrV4> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| NetError::Resolve(host.to_string()))?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| NetError::Resolve(host.to_string()))
}

/// Open a blocking TCP connection to `host:port`.
pub fn connect(host: &str, port: u16) -> NetResult<(RawFd, SocketAddrV4)> {
    let peer = resolve(host, port)?;
    let fd = check(unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) })
        .map_err(|errno| NetError::Socket { op: "socket", errno })?;

    let addr = to_sockaddr(&peer);
    let ret = check(unsafe {
        libc::connect(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    });
    if let Err(errno) = ret {
        let _ = close(fd);
        return Err(NetError::Socket { op: "connect", errno });
    }
    Ok((fd, peer))
}

pub fn set_nonblocking(fd: RawFd) -> Result<(), Errno> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map(drop)
}

/// Disable Nagle coalescing.
pub fn set_nodelay(fd: RawFd) -> Result<(), Errno> {
    set_int_option(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1)
}

/// Port the socket is bound to.
pub fn local_port(fd: RawFd) -> Result<u16, Errno> {
    let mut raw: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    check(unsafe {
        libc::getsockname(
            fd,
            &mut raw as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut len,
        )
    })?;
    Ok(from_sockaddr(&raw).port())
}

pub fn shutdown(fd: RawFd, how: Shutdown) -> Result<(), Errno> {
    let how = match how {
        Shutdown::Read => libc::SHUT_RD,
        Shutdown::Write => libc::SHUT_WR,
        Shutdown::Both => libc::SHUT_RDWR,
    };
    check(unsafe { libc::shutdown(fd, how) }).map(drop)
}

pub fn close(fd: RawFd) -> Result<(), Errno> {
    check(unsafe { libc::close(fd) }).map(drop)
}

// ============================================================================
// Socket-backed source and sink
// ============================================================================

/// [`ByteSource`] over `recv(2)`, stamping the benchmark around each call.
pub struct SocketReader<'a> {
    fd: RawFd,
    benchmark: &'a IoBenchmark,
    record: IoRecord,
}

impl<'a> SocketReader<'a> {
    pub fn new(fd: RawFd, benchmark: &'a IoBenchmark) -> Self {
        Self { fd, benchmark, record: IoRecord::default() }
    }

    /// Raw result of the last `recv`
    pub fn record(&self) -> IoRecord {
        self.record
    }

    pub fn status(&self) -> IoStatus {
        self.record.summarise()
    }
}

impl ByteSource for SocketReader<'_> {
    fn fill(&mut self, buf: &mut [u8]) -> usize {
        self.benchmark.mark_pre(Direction::In);
        let ret = unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        let errno = if ret < 0 { Some(Errno::last()) } else { None };
        self.benchmark.mark_post(Direction::In);

        self.record = IoRecord::new(buf.len(), ret as isize, errno);
        self.record.transferred()
    }
}

/// [`ByteSink`] over `send(2)` with `MSG_NOSIGNAL`.
pub struct SocketWriter<'a> {
    fd: RawFd,
    benchmark: &'a IoBenchmark,
    record: IoRecord,
}

impl<'a> SocketWriter<'a> {
    pub fn new(fd: RawFd, benchmark: &'a IoBenchmark) -> Self {
        Self { fd, benchmark, record: IoRecord::default() }
    }

    /// Raw result of the last `send`
    pub fn record(&self) -> IoRecord {
        self.record
    }

    pub fn status(&self) -> IoStatus {
        self.record.summarise()
    }
}

impl ByteSink for SocketWriter<'_> {
    fn consume(&mut self, bytes: &[u8]) -> usize {
        self.benchmark.mark_pre(Direction::Out);
        let ret = unsafe {
            libc::send(
                self.fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        let errno = if ret < 0 { Some(Errno::last()) } else { None };
        self.benchmark.mark_post(Direction::Out);

        self.record = IoRecord::new(bytes.len(), ret as isize, errno);
        self.record.transferred()
    }
}
