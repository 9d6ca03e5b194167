//! The lifecycle and configuration contract shared by every adapter variant.
//!
//! Both [`TunDevice`] and [`RingAdapter`] walk the same states:
//!
//! ```text
//! Unopened --create_or_open--> Bound --up--> Active
//!                                ^            |
//!                                +----down----+
//! Bound --delete--> Destroyed
//! ```
//!
//! Address, netmask, MTU and queue-length changes are independent and
//! idempotent; this layer imposes no ordering between them. [`configure`]
//! applies whatever the adapter's [`AdapterConfig`] asks for and brings the
//! link up last.
//!
//! [`TunDevice`]: crate::tuntap::TunDevice
//! [`RingAdapter`]: crate::ring::RingAdapter
//! [`configure`]: Interface::configure

use std::net::{IpAddr, Ipv4Addr};

use crate::config::AdapterConfig;
use crate::error::{Error, Result};

/// Lifecycle state of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    /// Configured but no kernel or driver object yet.
    Unopened,
    /// The adapter exists; no packets flow.
    Bound,
    /// The link is up (character device) or a session is running (ring).
    Active,
    /// Deleted. No further operations are possible.
    Destroyed,
}

impl AdapterState {
    /// Check if the adapter handle is valid in this state.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Bound | Self::Active)
    }

    /// Fail with [`Error::InvalidState`] unless the adapter handle is valid.
    pub(crate) fn require_open(self, operation: &'static str) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self,
            })
        }
    }

    /// Fail with [`Error::InvalidState`] unless in exactly `expected`.
    pub(crate) fn require(self, expected: AdapterState, operation: &'static str) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self,
            })
        }
    }
}

/// Platform-uniform adapter operations.
pub trait Interface {
    /// The adapter name (kernel-assigned names are reported after creation).
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> AdapterState;

    /// The configuration the adapter was built from.
    fn config(&self) -> &AdapterConfig;

    /// Open the adapter, creating it if it does not exist yet.
    fn create_or_open(&mut self) -> Result<()>;

    /// Assign an address.
    fn set_address(&mut self, addr: IpAddr) -> Result<()>;

    /// Set the IPv4 netmask.
    fn set_netmask(&mut self, mask: Ipv4Addr) -> Result<()>;

    /// Set the link MTU.
    fn set_mtu(&mut self, mtu: u32) -> Result<()>;

    /// Set the transmit queue length.
    fn set_tx_queue_len(&mut self, len: u32) -> Result<()>;

    /// Activate the adapter.
    fn up(&mut self) -> Result<()>;

    /// Deactivate the adapter.
    fn down(&mut self) -> Result<()>;

    /// Destroy the adapter.
    fn delete(&mut self) -> Result<()>;

    /// Read one frame into `buf`, returning its length.
    ///
    /// An empty non-blocking source yields an error whose
    /// [`is_would_block`](Error::is_would_block) is true.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Submit one frame for transmission.
    fn write_packet(&mut self, packet: &[u8]) -> Result<usize>;

    /// Apply the configured addressing and link parameters, then bring the
    /// adapter up.
    ///
    /// Parameters the variant has no primitive for are skipped.
    fn configure(&mut self) -> Result<()> {
        let config = self.config().clone();

        if let Some(addr) = config.ipv4_address {
            self.set_address(IpAddr::V4(addr))?;
        }
        if let Some(addr) = config.ipv6_address {
            self.set_address(IpAddr::V6(addr))?;
        }
        if let Some(mask) = config.netmask {
            skip_unsupported(self.set_netmask(mask), "netmask")?;
        }
        if let Some(mtu) = config.mtu {
            self.set_mtu(mtu)?;
        }
        if let Some(len) = config.tx_queue_len {
            skip_unsupported(self.set_tx_queue_len(len), "txqueuelen")?;
        }

        self.up()
    }
}

fn skip_unsupported(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Err(e) if e.is_not_supported() => {
            tracing::debug!("skipping {}: {}", what, e);
            Ok(())
        }
        other => other,
    }
}
