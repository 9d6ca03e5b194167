//! Linux TUN devices.
//!
//! [`TunDevice`] attaches to `/dev/net/tun` and configures the interface
//! with ioctls on a control socket. With the `async` feature,
//! [`AsyncTunDevice`] drives the same descriptor from a tokio runtime.

mod device;
mod ioctl;

#[cfg(feature = "async")]
mod async_device;

pub use device::TunDevice;

#[cfg(feature = "async")]
pub use async_device::AsyncTunDevice;
