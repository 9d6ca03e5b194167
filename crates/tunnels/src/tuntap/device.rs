//! TUN character device implementation.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use super::ioctl::{
    ControlSocket, IFF_MULTI_QUEUE, IFF_NO_PI, IFF_TUN, IFF_UP, IfReqAddr, IfReqFlags, IfReqInt, In6IfReq,
    SIOCGIFFLAGS, SIOCSIFADDR, SIOCSIFFLAGS, SIOCSIFMTU, SIOCSIFNETMASK, SIOCSIFTXQLEN, TUNSETGROUP, TUNSETIFF,
    TUNSETOWNER, TUNSETPERSIST, ioctl_req, ioctl_value,
};
use crate::command::{CommandRunner, Invocation, SystemRunner, run_best_effort};
use crate::config::{AdapterConfig, link_int};
use crate::error::{Error, Result};
use crate::iface::{AdapterState, Interface};
use crate::util::ifname::{from_ifreq_name, name_to_index, to_ifreq_name};

/// Build the `TUNSETIFF` request for `config`.
pub(crate) fn attach_request(config: &AdapterConfig) -> Result<IfReqFlags> {
    let mut flags = IFF_TUN | IFF_NO_PI;
    if config.multi_queue {
        flags |= IFF_MULTI_QUEUE;
    }
    Ok(IfReqFlags::new(to_ifreq_name(&config.name)?, flags))
}

/// A TUN device: raw IP frames over a character device, configured with
/// ioctls on a control socket.
///
/// # Example
///
/// ```ignore
/// use tunnels::{AdapterConfig, Interface};
/// use tunnels::tuntap::TunDevice;
///
/// let mut tun = TunDevice::create(AdapterConfig::new("tun0").mtu(1420))?;
/// tun.configure()?;
/// ```
#[derive(Debug)]
pub struct TunDevice {
    file: Option<File>,
    name: String,
    config: AdapterConfig,
    state: AdapterState,
    runner: Arc<dyn CommandRunner>,
}

impl TunDevice {
    /// Create an unopened device.
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            file: None,
            name: config.name.clone(),
            config,
            state: AdapterState::Unopened,
            runner: Arc::new(SystemRunner),
        }
    }

    /// Create and open the device in one step.
    pub fn create(config: AdapterConfig) -> Result<Self> {
        let mut device = Self::new(config);
        device.create_or_open()?;
        Ok(device)
    }

    /// Replace the runner used for the `ip link delete` cleanup.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Check if the device survives close.
    pub fn is_persistent(&self) -> bool {
        self.config.persistent
    }

    /// The raw descriptor, if open.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Get a reference to the underlying file.
    pub fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(Error::InvalidState {
            operation: "file",
            state: self.state,
        })
    }

    /// Toggle persistence on the open device.
    pub fn set_persistent(&mut self, persistent: bool) -> Result<()> {
        let fd = self.fd("set_persistent")?;
        ioctl_value(fd, "TUNSETPERSIST", TUNSETPERSIST, persistent as libc::c_ulong)?;
        self.config.persistent = persistent;
        Ok(())
    }

    fn fd(&self, operation: &'static str) -> Result<RawFd> {
        self.state.require_open(operation)?;
        self.raw_fd().ok_or(Error::InvalidState {
            operation,
            state: self.state,
        })
    }

    fn name_field(&self) -> Result<[u8; 16]> {
        to_ifreq_name(&self.name)
    }

    fn get_flags(&self) -> Result<i16> {
        let mut req = IfReqFlags::new(self.name_field()?, 0);
        ControlSocket::open(libc::AF_INET)?.ioctl("SIOCGIFFLAGS", SIOCGIFFLAGS, &mut req)?;
        Ok(req.flags)
    }

    fn set_flags(&self, flags: i16) -> Result<()> {
        let mut req = IfReqFlags::new(self.name_field()?, flags);
        ControlSocket::open(libc::AF_INET)?.ioctl("SIOCSIFFLAGS", SIOCSIFFLAGS, &mut req)
    }

    fn set_int(&self, what: &'static str, name: &'static str, request: libc::c_ulong, value: u32) -> Result<()> {
        let value = link_int(what, value)?;
        let mut req = IfReqInt::new(self.name_field()?, value);
        ControlSocket::open(libc::AF_INET)?.ioctl(name, request, &mut req)
    }
}

impl Interface for TunDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> AdapterState {
        self.state
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Open the clone device and attach it to the named interface.
    ///
    /// The interface is created if it does not exist. With an empty name the
    /// kernel picks one, reported by [`name`](Interface::name) afterwards.
    /// A failing step aborts without undoing earlier ones.
    fn create_or_open(&mut self) -> Result<()> {
        if self.state.is_open() {
            return Ok(());
        }
        self.state.require(AdapterState::Unopened, "create_or_open")?;
        self.config.validate()?;
        let mut req = attach_request(&self.config)?;

        let mut options = OpenOptions::new();
        options.read(true).write(true).custom_flags(libc::O_CLOEXEC);
        if self.config.nonblocking {
            options.custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC);
        }
        let file = options.open(&self.config.device_path)?;
        let fd = file.as_raw_fd();

        ioctl_req(fd, "TUNSETIFF", TUNSETIFF, &mut req)?;
        if let Some(uid) = self.config.owner {
            ioctl_value(fd, "TUNSETOWNER", TUNSETOWNER, uid as libc::c_ulong)?;
        }
        if let Some(gid) = self.config.group {
            ioctl_value(fd, "TUNSETGROUP", TUNSETGROUP, gid as libc::c_ulong)?;
        }
        if self.config.persistent {
            ioctl_value(fd, "TUNSETPERSIST", TUNSETPERSIST, 1)?;
        }

        self.name = from_ifreq_name(&req.name);
        self.file = Some(file);
        self.state = AdapterState::Bound;
        tracing::debug!(device = %self.name, "attached TUN device");
        Ok(())
    }

    fn set_address(&mut self, addr: IpAddr) -> Result<()> {
        self.state.require_open("set_address")?;
        match addr {
            IpAddr::V4(v4) => {
                let mut req = IfReqAddr::new(self.name_field()?, v4.octets());
                ControlSocket::open(libc::AF_INET)?.ioctl("SIOCSIFADDR", SIOCSIFADDR, &mut req)?;
                self.config.ipv4_address = Some(v4);
            }
            IpAddr::V6(v6) => {
                let ifindex = name_to_index(&self.name)?;
                let mut req = In6IfReq {
                    addr: v6.octets(),
                    prefix_len: u32::from(self.config.ipv6_prefix),
                    ifindex: ifindex as i32,
                };
                ControlSocket::open(libc::AF_INET6)?.ioctl("SIOCSIFADDR", SIOCSIFADDR, &mut req)?;
                self.config.ipv6_address = Some(v6);
            }
        }
        Ok(())
    }

    fn set_netmask(&mut self, mask: Ipv4Addr) -> Result<()> {
        self.state.require_open("set_netmask")?;
        crate::util::netmask_to_prefix(mask)?;
        let mut req = IfReqAddr::new(self.name_field()?, mask.octets());
        ControlSocket::open(libc::AF_INET)?.ioctl("SIOCSIFNETMASK", SIOCSIFNETMASK, &mut req)?;
        self.config.netmask = Some(mask);
        Ok(())
    }

    fn set_mtu(&mut self, mtu: u32) -> Result<()> {
        self.state.require_open("set_mtu")?;
        self.set_int("mtu", "SIOCSIFMTU", SIOCSIFMTU, mtu)?;
        self.config.mtu = Some(mtu);
        Ok(())
    }

    fn set_tx_queue_len(&mut self, len: u32) -> Result<()> {
        self.state.require_open("set_tx_queue_len")?;
        self.set_int("txqueuelen", "SIOCSIFTXQLEN", SIOCSIFTXQLEN, len)?;
        self.config.tx_queue_len = Some(len);
        Ok(())
    }

    fn up(&mut self) -> Result<()> {
        self.state.require_open("up")?;
        let flags = self.get_flags()?;
        self.set_flags(flags | IFF_UP)?;
        self.state = AdapterState::Active;
        Ok(())
    }

    fn down(&mut self) -> Result<()> {
        self.state.require_open("down")?;
        let flags = self.get_flags()?;
        self.set_flags(flags & !IFF_UP)?;
        self.state = AdapterState::Bound;
        Ok(())
    }

    /// Remove the interface.
    ///
    /// Clearing the interface flags takes the link down, so this is
    /// accepted while up as well.
    fn delete(&mut self) -> Result<()> {
        let fd = self.fd("delete")?;
        if self.config.persistent {
            ioctl_value(fd, "TUNSETPERSIST", TUNSETPERSIST, 0)?;
        }
        self.set_flags(0)?;
        self.file = None;

        let invocation = Invocation::new("ip").args(["link", "delete", self.name.as_str()]);
        run_best_effort(&*self.runner, &invocation);

        self.state = AdapterState::Destroyed;
        tracing::debug!(device = %self.name, "deleted TUN device");
        Ok(())
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.state.require_open("read_packet")?;
        Ok(self.read(buf)?)
    }

    fn write_packet(&mut self, packet: &[u8]) -> Result<usize> {
        self.state.require_open("write_packet")?;
        Ok(self.write(packet)?)
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "TUN device is not open")
}

impl Read for TunDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.as_mut().ok_or_else(not_open)?.read(buf)
    }
}

impl Write for TunDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.as_mut().ok_or_else(not_open)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_request_multi_queue() {
        let single = attach_request(&AdapterConfig::new("tun7")).unwrap();
        let multi = attach_request(&AdapterConfig::new("tun7").multi_queue(true)).unwrap();

        assert_eq!(single.name, multi.name);
        assert_eq!(single.flags, IFF_TUN | IFF_NO_PI);
        assert_eq!(multi.flags ^ single.flags, IFF_MULTI_QUEUE);
    }

    #[test]
    fn test_attach_request_rejects_long_name() {
        let config = AdapterConfig::new("a-very-long-interface-name");
        assert!(matches!(attach_request(&config), Err(Error::NameTooLong { .. })));
    }

    #[test]
    fn test_oversized_link_settings_rejected() {
        let tun = TunDevice::new(AdapterConfig::new("tun9"));
        assert!(matches!(
            tun.set_int("mtu", "SIOCSIFMTU", SIOCSIFMTU, u32::MAX),
            Err(Error::InvalidArgument { what: "mtu", value: u32::MAX })
        ));
        assert!(matches!(
            tun.set_int("txqueuelen", "SIOCSIFTXQLEN", SIOCSIFTXQLEN, 1 << 31),
            Err(Error::InvalidArgument { what: "txqueuelen", .. })
        ));
    }

    #[test]
    fn test_unopened_device() {
        let mut tun = TunDevice::new(AdapterConfig::new("tun9"));
        assert_eq!(tun.state(), AdapterState::Unopened);
        assert!(tun.raw_fd().is_none());

        let mut buf = [0u8; 64];
        assert!(matches!(
            tun.read_packet(&mut buf),
            Err(Error::InvalidState {
                operation: "read_packet",
                ..
            })
        ));
        assert!(tun.set_mtu(1400).is_err());
        assert!(tun.delete().is_err());
    }

    #[test]
    fn test_missing_clone_device() {
        let config = AdapterConfig::new("tun9").device_path("/nonexistent/net/tun");
        let err = TunDevice::create(config).unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
