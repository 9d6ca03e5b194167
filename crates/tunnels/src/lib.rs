//! Virtual tunnel adapters behind one lifecycle contract.
//!
//! This crate moves raw IP frames between a caller-supplied buffer and a
//! virtual network interface. Two adapter variants implement the same
//! [`Interface`] state machine:
//!
//! - [`tuntap::TunDevice`] - a Linux TUN character device configured with
//!   ioctls, exchanging frames as plain reads and writes.
//! - [`ring::RingAdapter`] - a driver-backed adapter (Wintun-style) reached
//!   through a dynamically loaded library, exchanging frames through a
//!   shared packet ring with explicit leases.
//!
//! A third path, [`rawsock::RawSocketLink`], skips the virtual adapter and
//! re-injects frames through a raw socket, retargeting each one from its
//! IPv4 header.
//!
//! # Features
//!
//! - `async` - [`tuntap::AsyncTunDevice`] on top of tokio
//! - `serde` - JSON (de)serialization of [`AdapterConfig`]
//! - `lab` - hermetic test helpers ([`lab::LoopbackDriver`],
//!   [`lab::RecordingRunner`])
//! - `full` - all features enabled
//!
//! # Example
//!
//! ```ignore
//! use tunnels::{AdapterConfig, Interface};
//! use tunnels::tuntap::TunDevice;
//!
//! let config = AdapterConfig::new("tun0")
//!     .ipv4_address("10.8.0.1".parse()?)
//!     .netmask("255.255.255.0".parse()?)
//!     .mtu(1420);
//!
//! let mut tun = TunDevice::create(config)?;
//! tun.configure()?;
//!
//! let mut buf = [0u8; 65535];
//! loop {
//!     match tun.read_packet(&mut buf) {
//!         Ok(n) => handle(&buf[..n]),
//!         Err(e) if e.is_would_block() => std::thread::sleep(BACKOFF),
//!         Err(e) => return Err(e),
//!     }
//! }
//! ```
//!
//! # Packet ring
//!
//! ```ignore
//! use std::sync::Arc;
//! use tunnels::ring::{NativeDriver, RingAdapter};
//!
//! let driver = Arc::new(NativeDriver::load("wintun.dll"));
//! let mut adapter = RingAdapter::new(driver, AdapterConfig::new("Tunnels"));
//! adapter.create_or_open()?;
//! adapter.start_session(0x400000)?;
//!
//! let mut packet = adapter.allocate_send_packet(frame.len())?;
//! packet.copy_from_slice(&frame);
//! adapter.send_packet(packet);
//!
//! let received = adapter.receive_packet()?;
//! process(&received);
//! adapter.release_receive_packet(received);
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod iface;
pub mod resolver;
pub mod ring;
pub mod route;
pub mod util;

#[cfg(target_os = "linux")]
pub mod rawsock;

#[cfg(target_os = "linux")]
pub mod tuntap;

#[cfg(feature = "lab")]
pub mod lab;

pub use config::{AdapterConfig, Guid};
pub use error::{Error, Result};
pub use iface::{AdapterState, Interface};
