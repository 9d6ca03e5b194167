//! Kernel request layouts and the control calls that carry them.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::util::ifname::IFNAMSIZ;

// TUN/TAP ioctl constants
pub(crate) const TUNSETIFF: libc::c_ulong = 0x400454ca;
pub(crate) const TUNSETPERSIST: libc::c_ulong = 0x400454cb;
pub(crate) const TUNSETOWNER: libc::c_ulong = 0x400454cc;
pub(crate) const TUNSETGROUP: libc::c_ulong = 0x400454ce;

// Socket ioctl constants (from linux/sockios.h)
pub(crate) const SIOCGIFFLAGS: libc::c_ulong = 0x8913;
pub(crate) const SIOCSIFFLAGS: libc::c_ulong = 0x8914;
pub(crate) const SIOCSIFADDR: libc::c_ulong = 0x8916;
pub(crate) const SIOCSIFNETMASK: libc::c_ulong = 0x891c;
pub(crate) const SIOCSIFMTU: libc::c_ulong = 0x8922;
pub(crate) const SIOCSIFTXQLEN: libc::c_ulong = 0x8943;

// TUN flags (from linux/if_tun.h)
/// TUN device (Layer 3).
pub(crate) const IFF_TUN: i16 = 0x0001;
/// No protocol information.
pub(crate) const IFF_NO_PI: i16 = 0x1000;
/// Multi-queue support.
pub(crate) const IFF_MULTI_QUEUE: i16 = 0x0100;

/// Interface is up.
pub(crate) const IFF_UP: i16 = 0x0001;

/// `ifreq` carrying flags.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub(crate) struct IfReqFlags {
    pub name: [u8; IFNAMSIZ],
    pub flags: i16,
    _pad: [u8; 22],
}

impl IfReqFlags {
    pub fn new(name: [u8; IFNAMSIZ], flags: i16) -> Self {
        let mut req = Self::new_zeroed();
        req.name = name;
        req.flags = flags;
        req
    }
}

/// `ifreq` carrying an integer (MTU, queue length).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub(crate) struct IfReqInt {
    pub name: [u8; IFNAMSIZ],
    pub value: i32,
    _pad: [u8; 20],
}

impl IfReqInt {
    pub fn new(name: [u8; IFNAMSIZ], value: i32) -> Self {
        let mut req = Self::new_zeroed();
        req.name = name;
        req.value = value;
        req
    }
}

/// `sockaddr_in` as embedded in `ifreq`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub(crate) struct SockAddrIn {
    pub family: u16,
    pub port: [u8; 2],
    pub addr: [u8; 4],
    pub zero: [u8; 8],
}

/// `ifreq` carrying an IPv4 address or netmask.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub(crate) struct IfReqAddr {
    pub name: [u8; IFNAMSIZ],
    pub addr: SockAddrIn,
    _pad: [u8; 8],
}

impl IfReqAddr {
    pub fn new(name: [u8; IFNAMSIZ], addr: [u8; 4]) -> Self {
        let mut req = Self::new_zeroed();
        req.name = name;
        req.addr.family = libc::AF_INET as u16;
        req.addr.addr = addr;
        req
    }
}

/// `in6_ifreq`: address, prefix length and interface index.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub(crate) struct In6IfReq {
    pub addr: [u8; 16],
    pub prefix_len: u32,
    pub ifindex: i32,
}

/// Issue an ioctl whose argument is a request structure.
pub(crate) fn ioctl_req<T>(fd: RawFd, name: &'static str, request: libc::c_ulong, req: &mut T) -> Result<()>
where
    T: FromBytes + IntoBytes,
{
    tracing::debug!(ioctl = name, "control call");
    // SAFETY: `req` is a plain repr(C) request matching `request`.
    let ret = unsafe { libc::ioctl(fd, request as _, req as *mut T) };
    if ret < 0 {
        return Err(Error::ioctl(name, io::Error::last_os_error()));
    }
    Ok(())
}

/// Issue an ioctl whose argument is passed by value.
pub(crate) fn ioctl_value(fd: RawFd, name: &'static str, request: libc::c_ulong, value: libc::c_ulong) -> Result<()> {
    tracing::debug!(ioctl = name, value, "control call");
    let ret = unsafe { libc::ioctl(fd, request as _, value) };
    if ret < 0 {
        return Err(Error::ioctl(name, io::Error::last_os_error()));
    }
    Ok(())
}

/// A datagram socket used only as an ioctl target.
#[derive(Debug)]
pub(crate) struct ControlSocket(OwnedFd);

impl ControlSocket {
    pub fn open(family: libc::c_int) -> Result<Self> {
        let fd = unsafe { libc::socket(family, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        // SAFETY: fd was just returned by socket(2).
        Ok(Self(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    pub fn ioctl<T: FromBytes + IntoBytes>(&self, name: &'static str, request: libc::c_ulong, req: &mut T) -> Result<()> {
        ioctl_req(self.0.as_raw_fd(), name, request, req)
    }
}
