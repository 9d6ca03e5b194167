//! Tokio integration for [`TunDevice`].

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::TunDevice;
use crate::error::{Error, Result};
use crate::iface::Interface;

/// A TUN device read and written from async tasks.
///
/// # Example
///
/// ```ignore
/// use tunnels::AdapterConfig;
/// use tunnels::tuntap::{AsyncTunDevice, TunDevice};
///
/// let tun = AsyncTunDevice::new(TunDevice::create(AdapterConfig::new("tun0"))?)?;
/// let mut buf = vec![0u8; 65535];
/// let n = tun.recv(&mut buf).await?;
/// tun.send(&buf[..n]).await?;
/// ```
#[derive(Debug)]
pub struct AsyncTunDevice {
    // Declared first: deregister before the device closes the descriptor.
    io: AsyncFd<RawFd>,
    device: TunDevice,
}

impl AsyncTunDevice {
    /// Register an open device with the runtime, switching it to
    /// non-blocking mode if needed.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(device: TunDevice) -> Result<Self> {
        let fd = device.raw_fd().ok_or(Error::InvalidState {
            operation: "AsyncTunDevice::new",
            state: device.state(),
        })?;
        set_nonblocking(fd)?;
        let io = AsyncFd::with_interest(fd, Interest::READABLE | Interest::WRITABLE)?;
        Ok(Self { io, device })
    }

    /// The interface name.
    pub fn name(&self) -> &str {
        self.device.name()
    }

    /// The wrapped device.
    pub fn device(&self) -> &TunDevice {
        &self.device
    }

    /// The wrapped device, for configuration calls.
    pub fn device_mut(&mut self) -> &mut TunDevice {
        &mut self.device
    }

    /// Receive one frame.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = self.io.ready(Interest::READABLE).await?;

            match guard.try_io(|_| {
                let mut file = self.device.file().map_err(io::Error::other)?;
                file.read(buf)
            }) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
    }

    /// Send one frame.
    pub async fn send(&self, packet: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.io.ready(Interest::WRITABLE).await?;

            match guard.try_io(|_| {
                let mut file = self.device.file().map_err(io::Error::other)?;
                file.write(packet)
            }) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
    }

    /// Unregister from the runtime and return the device.
    pub fn into_inner(self) -> TunDevice {
        let Self { io, device } = self;
        drop(io);
        device
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    if flags & libc::O_NONBLOCK == 0 && unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(())
}
