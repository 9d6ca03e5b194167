//! Frame re-injection through raw sockets.
//!
//! A [`RawSocketLink`] receives frames on one socket bound to an interface
//! and writes frames out through an `IPPROTO_RAW` socket, sending each to
//! the address and port found in its own IPv4 and transport headers.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use crate::error::{Error, Result};

/// Default receive buffer: one maximum-size frame plus headroom.
pub const DEFAULT_BUFFER_SIZE: usize = 65535 + 2000;

/// Minimum IPv4 header length.
const IPV4_HEADER_MIN: usize = 20;

/// Parameters of the receive socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSocketConfig {
    /// Interface to bind the receive socket to.
    pub interface: String,
    /// Size of the internal receive buffer.
    pub buffer_size: usize,
    /// Address family of the receive socket.
    pub domain: libc::c_int,
    /// Socket type of the receive socket.
    pub sock_type: libc::c_int,
    /// Protocol of the receive socket.
    pub protocol: libc::c_int,
}

impl RawSocketConfig {
    /// Raw TCP capture on `interface`.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            domain: libc::AF_INET,
            sock_type: libc::SOCK_RAW,
            protocol: libc::IPPROTO_TCP,
        }
    }

    /// Set the receive buffer size.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the receive socket's protocol.
    pub fn protocol(mut self, protocol: libc::c_int) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Locate the destination a frame should be re-sent to.
///
/// The address is read from IPv4 header bytes 16..20 and the port from the
/// first two bytes of the transport header at `IHL * 4 + 2`.
pub fn reflect_target(frame: &[u8]) -> Result<SocketAddrV4> {
    let len = frame.len();
    if len < IPV4_HEADER_MIN {
        return Err(Error::MalformedFrame {
            len,
            needed: IPV4_HEADER_MIN,
        });
    }
    let header_len = usize::from(frame[0] & 0x0f) * 4;
    // An IHL below 5 cannot hold the fixed header; report the smallest
    // well-formed frame.
    if header_len < IPV4_HEADER_MIN {
        return Err(Error::MalformedFrame {
            len,
            needed: IPV4_HEADER_MIN + 4,
        });
    }
    let needed = header_len + 4;
    if len < needed {
        return Err(Error::MalformedFrame { len, needed });
    }

    let addr = Ipv4Addr::new(frame[16], frame[17], frame[18], frame[19]);
    let port = u16::from_be_bytes([frame[needed - 2], frame[needed - 1]]);
    Ok(SocketAddrV4::new(addr, port))
}

/// A receive socket and a send socket used as a tunnel link.
#[derive(Debug)]
pub struct RawSocketLink {
    recv: OwnedFd,
    send: OwnedFd,
    buffer: Vec<u8>,
    last_target: Option<SocketAddrV4>,
}

impl RawSocketLink {
    /// Open and configure both sockets.
    ///
    /// Needs `CAP_NET_RAW`. On failure, sockets already opened are closed.
    pub fn create(config: &RawSocketConfig) -> Result<Self> {
        let recv = socket(config.domain, config.sock_type, config.protocol)?;
        set_nonblocking(&recv)?;
        setsockopt_int(&recv, libc::SO_REUSEADDR, 1, "SO_REUSEADDR")?;
        bind_to_device(&recv, &config.interface)?;

        let send = socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_RAW)?;

        tracing::debug!(interface = %config.interface, "raw socket link ready");
        Ok(Self::from_fds(recv, send, config.buffer_size))
    }

    /// Build a link from already configured sockets.
    ///
    /// `send` must accept whole IPv4 frames through `sendto`.
    pub fn from_fds(recv: OwnedFd, send: OwnedFd, buffer_size: usize) -> Self {
        Self {
            recv,
            send,
            buffer: vec![0; buffer_size],
            last_target: None,
        }
    }

    /// Receive one frame into `buf`.
    ///
    /// With no data pending the error's
    /// [`is_would_block`](Error::is_would_block) is true.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let n = unsafe { libc::recv(self.recv.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), 0) };
        if n < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(n as usize)
    }

    /// Receive one frame into the internal buffer.
    pub fn recv_frame(&mut self) -> Result<&[u8]> {
        let n = unsafe {
            libc::recv(
                self.recv.as_raw_fd(),
                self.buffer.as_mut_ptr().cast(),
                self.buffer.len(),
                0,
            )
        };
        if n < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(&self.buffer[..n as usize])
    }

    /// Send `frame` to the destination named in its headers.
    pub fn write(&mut self, frame: &[u8]) -> Result<usize> {
        let target = reflect_target(frame)?;
        let addr = sockaddr_in(target);

        let n = unsafe {
            libc::sendto(
                self.send.as_raw_fd(),
                frame.as_ptr().cast(),
                frame.len(),
                0,
                (&addr as *const libc::sockaddr_in).cast(),
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if n < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        self.last_target = Some(target);
        Ok(n as usize)
    }

    /// The destination of the last successful write.
    pub fn last_target(&self) -> Option<SocketAddrV4> {
        self.last_target
    }
}

fn socket(domain: libc::c_int, sock_type: libc::c_int, protocol: libc::c_int) -> Result<OwnedFd> {
    let fd = unsafe { libc::socket(domain, sock_type | libc::SOCK_CLOEXEC, protocol) };
    if fd < 0 {
        return Err(Error::SocketUnavailable {
            operation: "socket",
            source: io::Error::last_os_error(),
        });
    }
    // SAFETY: fd was just returned by socket(2).
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(Error::SocketUnavailable {
            operation: "O_NONBLOCK",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn setsockopt_int(fd: &OwnedFd, option: libc::c_int, value: libc::c_int, operation: &'static str) -> Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(Error::SocketUnavailable {
            operation,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn bind_to_device(fd: &OwnedFd, interface: &str) -> Result<()> {
    crate::util::ifname::validate(interface).map_err(|e| Error::SocketUnavailable {
        operation: "SO_BINDTODEVICE",
        source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
    })?;
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            interface.as_ptr().cast(),
            interface.len() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(Error::SocketUnavailable {
            operation: "SO_BINDTODEVICE",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn sockaddr_in(target: SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: all-zero is a valid sockaddr_in.
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = target.port().to_be();
    addr.sin_addr.s_addr = u32::from_ne_bytes(target.ip().octets());
    addr
}
