//! The ring-driver adapter state machine.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use super::codes::{ERROR_BUFFER_OVERFLOW, ERROR_NO_MORE_ITEMS};
use super::driver::{RawAdapter, RawSession, RingDriver};
use super::packet::{RecvPacket, SendPacket};
use super::{PACKET_SIZE_MAX, RING_CAPACITY_MAX, RING_CAPACITY_MIN};
use crate::command::{CommandRunner, Invocation, SystemRunner, run_best_effort, run_checked};
use crate::config::AdapterConfig;
use crate::error::{Error, Result};
use crate::iface::{AdapterState, Interface};

/// An adapter of a packet-ring driver.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tunnels::{AdapterConfig, Interface};
/// use tunnels::ring::{NativeDriver, RingAdapter};
///
/// # fn main() -> tunnels::Result<()> {
/// let driver = Arc::new(NativeDriver::load("wintun.dll"));
/// let mut adapter = RingAdapter::new(driver, AdapterConfig::new("wg0"));
/// adapter.create_or_open()?;
/// adapter.start_session(0x40_0000)?;
///
/// let mut packet = adapter.allocate_send_packet(20)?;
/// packet[0] = 0x45;
/// adapter.send_packet(packet);
/// # Ok(())
/// # }
/// ```
///
/// Addressing goes through `netsh`; see [`Interface`] for the uniform
/// configuration calls.
#[derive(Debug)]
pub struct RingAdapter {
    driver: Arc<dyn RingDriver>,
    runner: Arc<dyn CommandRunner>,
    config: AdapterConfig,
    adapter: Option<RawAdapter>,
    session: Option<RawSession>,
    capacity: Option<u32>,
    state: AdapterState,
}

impl RingAdapter {
    /// Create an unopened adapter.
    pub fn new(driver: Arc<dyn RingDriver>, config: AdapterConfig) -> Self {
        Self {
            driver,
            runner: Arc::new(SystemRunner),
            config,
            adapter: None,
            session: None,
            capacity: None,
            state: AdapterState::Unopened,
        }
    }

    /// Replace the runner used for `netsh` invocations.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Create the adapter object and open it in one step.
    pub fn open(driver: Arc<dyn RingDriver>, config: AdapterConfig) -> Result<Self> {
        let mut adapter = Self::new(driver, config);
        adapter.create_or_open()?;
        Ok(adapter)
    }

    /// Capacity of the running session's ring.
    pub fn ring_capacity(&self) -> Option<u32> {
        self.capacity
    }

    /// Start a packet session with a ring of `capacity` bytes.
    ///
    /// The capacity must lie between [`RING_CAPACITY_MIN`] and
    /// [`RING_CAPACITY_MAX`]; the driver decides on anything else.
    pub fn start_session(&mut self, capacity: u32) -> Result<()> {
        if !(RING_CAPACITY_MIN..=RING_CAPACITY_MAX).contains(&capacity) {
            return Err(Error::InvalidRingCapacity { capacity });
        }
        self.state.require(AdapterState::Bound, "start_session")?;
        let adapter = self.handle("start_session")?;

        // SAFETY: the adapter is open while Bound.
        let session = unsafe { self.driver.start_session(adapter, capacity)? };
        self.session = Some(session);
        self.capacity = Some(capacity);
        self.state = AdapterState::Active;
        tracing::debug!(adapter = %self.config.name, capacity, "session started");
        Ok(())
    }

    /// End the packet session.
    ///
    /// Outstanding leases borrow the adapter, so none can be alive here.
    pub fn end_session(&mut self) -> Result<()> {
        self.state.require(AdapterState::Active, "end_session")?;
        if let Some(session) = self.session.take() {
            // SAFETY: `&mut self` proves no lease is outstanding.
            unsafe { self.driver.end_session(session) };
        }
        self.capacity = None;
        self.state = AdapterState::Bound;
        tracing::debug!(adapter = %self.config.name, "session ended");
        Ok(())
    }

    /// Reserve `size` bytes of the send ring.
    ///
    /// Fails with [`Error::RingExhausted`] when the ring is full; retry after
    /// the driver drains it.
    pub fn allocate_send_packet(&self, size: usize) -> Result<SendPacket<'_>> {
        if size == 0 || size > PACKET_SIZE_MAX as usize {
            return Err(Error::InvalidPacketSize { size });
        }
        let session = self.session("allocate_send_packet")?;

        // SAFETY: the session runs while Active; size is within limits.
        let data = unsafe { self.driver.allocate_send_packet(session, size as u32) }.map_err(|e| {
            if e.raw_os_error() == Some(ERROR_BUFFER_OVERFLOW) {
                Error::RingExhausted
            } else {
                e
            }
        })?;
        Ok(unsafe { SendPacket::new(&*self.driver, session, data, size) })
    }

    /// Submit a filled send packet. The driver reports nothing back.
    pub fn send_packet(&self, packet: SendPacket<'_>) {
        packet.send();
    }

    /// Take the next received packet.
    ///
    /// Fails with [`Error::NoPacketAvailable`] when the ring is empty.
    pub fn receive_packet(&self) -> Result<RecvPacket<'_>> {
        let session = self.session("receive_packet")?;

        // SAFETY: the session runs while Active.
        let (data, len) = unsafe { self.driver.receive_packet(session) }.map_err(|e| {
            if e.raw_os_error() == Some(ERROR_NO_MORE_ITEMS) {
                Error::NoPacketAvailable
            } else {
                e
            }
        })?;
        Ok(unsafe { RecvPacket::new(&*self.driver, session, data, len as usize) })
    }

    /// Return a received packet's ring space.
    pub fn release_receive_packet(&self, packet: RecvPacket<'_>) {
        packet.release();
    }

    /// Version of the running driver.
    pub fn running_driver_version(&self) -> Result<u32> {
        self.driver.running_driver_version()
    }

    /// Remove the driver from the system; fails while adapters still use it.
    pub fn delete_driver(&self) -> Result<()> {
        self.driver.delete_driver()
    }

    /// Set the IPv4 neighbor retransmit time in milliseconds.
    pub fn set_retransmit_time(&mut self, ms: u32) -> Result<()> {
        self.state.require_open("set_retransmit_time")?;
        run_checked(&*self.runner, &netsh_retransmit(&self.config.name, ms))?;
        Ok(())
    }

    fn handle(&self, operation: &'static str) -> Result<RawAdapter> {
        self.adapter.ok_or(Error::InvalidState {
            operation,
            state: self.state,
        })
    }

    fn session(&self, operation: &'static str) -> Result<RawSession> {
        self.state.require(AdapterState::Active, operation)?;
        self.session.ok_or(Error::InvalidState {
            operation,
            state: self.state,
        })
    }
}

impl Interface for RingAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn state(&self) -> AdapterState {
        self.state
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Open the adapter by name, creating it when the open fails.
    fn create_or_open(&mut self) -> Result<()> {
        if self.state.is_open() {
            return Ok(());
        }
        self.state.require(AdapterState::Unopened, "create_or_open")?;
        self.config.validate()?;
        if self.config.name.is_empty() {
            return Err(Error::InvalidName("ring adapters need a name".into()));
        }

        let adapter = match self.driver.open_adapter(&self.config.name) {
            Ok(adapter) => {
                tracing::debug!(adapter = %self.config.name, "opened existing adapter");
                adapter
            }
            Err(Error::Driver { source, .. }) => {
                tracing::debug!(adapter = %self.config.name, "open failed ({}), creating", source);
                self.driver
                    .create_adapter(&self.config.name, &self.config.tunnel_type, self.config.guid.as_ref())
                    .map_err(|e| match e {
                        Error::Driver { source, .. } => Error::AdapterUnavailable {
                            name: self.config.name.clone(),
                            source,
                        },
                        other => other,
                    })?
            }
            Err(e) => return Err(e),
        };

        self.adapter = Some(adapter);
        self.state = AdapterState::Bound;
        Ok(())
    }

    fn set_address(&mut self, addr: IpAddr) -> Result<()> {
        self.state.require_open("set_address")?;
        let invocation = match addr {
            IpAddr::V4(v4) => {
                let inv = netsh_set_ipv4(&self.config, v4);
                self.config.ipv4_address = Some(v4);
                inv
            }
            IpAddr::V6(v6) => {
                let inv = Invocation::new("netsh").args([
                    "interface".to_string(),
                    "ipv6".to_string(),
                    "add".to_string(),
                    "address".to_string(),
                    format!("interface={}", self.config.name),
                    format!("address={}/{}", v6, self.config.ipv6_prefix),
                ]);
                self.config.ipv6_address = Some(v6);
                inv
            }
        };
        run_checked(&*self.runner, &invocation)?;
        Ok(())
    }

    /// `netsh` sets the mask together with the address.
    fn set_netmask(&mut self, _mask: Ipv4Addr) -> Result<()> {
        Err(Error::NotSupported("netmask is set with the address".into()))
    }

    fn set_mtu(&mut self, mtu: u32) -> Result<()> {
        self.state.require_open("set_mtu")?;
        let invocation = Invocation::new("netsh").args([
            "interface".to_string(),
            "ipv4".to_string(),
            "set".to_string(),
            "interface".to_string(),
            format!("interface={}", self.config.name),
            format!("mtu={}", mtu),
        ]);
        run_checked(&*self.runner, &invocation)?;
        self.config.mtu = Some(mtu);
        Ok(())
    }

    fn set_tx_queue_len(&mut self, _len: u32) -> Result<()> {
        Err(Error::NotSupported("transmit queue length".into()))
    }

    /// Start a session with the configured ring capacity.
    fn up(&mut self) -> Result<()> {
        self.state.require_open("up")?;
        if self.state == AdapterState::Active {
            return Ok(());
        }
        self.start_session(self.config.ring_capacity)
    }

    /// End the session and drop the configured IPv4 address.
    fn down(&mut self) -> Result<()> {
        self.state.require_open("down")?;
        if self.state == AdapterState::Active {
            self.end_session()?;
        }
        if let Some(addr) = self.config.ipv4_address {
            let invocation = Invocation::new("netsh").args([
                "interface".to_string(),
                "ipv4".to_string(),
                "delete".to_string(),
                "address".to_string(),
                format!("name={}", self.config.name),
                format!("addr={}", addr),
                "gateway=all".to_string(),
            ]);
            run_best_effort(&*self.runner, &invocation);
        }
        Ok(())
    }

    /// Close the adapter handle. The session must be ended first.
    fn delete(&mut self) -> Result<()> {
        self.state.require(AdapterState::Bound, "delete")?;
        if let Some(adapter) = self.adapter.take() {
            // SAFETY: Bound means no session is running.
            unsafe { self.driver.close_adapter(adapter) };
        }
        self.state = AdapterState::Destroyed;
        tracing::debug!(adapter = %self.config.name, "adapter closed");
        Ok(())
    }

    /// Copy the next received packet into `buf` and release it.
    ///
    /// A packet longer than `buf` is truncated.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize> {
        let packet = self.receive_packet()?;
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        self.release_receive_packet(packet);
        Ok(n)
    }

    fn write_packet(&mut self, packet: &[u8]) -> Result<usize> {
        let mut lease = self.allocate_send_packet(packet.len())?;
        lease.copy_from_slice(packet);
        self.send_packet(lease);
        Ok(packet.len())
    }
}

impl Drop for RingAdapter {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            unsafe { self.driver.end_session(session) };
        }
        if let Some(adapter) = self.adapter.take() {
            unsafe { self.driver.close_adapter(adapter) };
        }
    }
}

fn netsh_set_ipv4(config: &AdapterConfig, addr: Ipv4Addr) -> Invocation {
    let mask = config.netmask.unwrap_or(Ipv4Addr::BROADCAST);
    let mut inv = Invocation::new("netsh").args([
        "interface".to_string(),
        "ipv4".to_string(),
        "set".to_string(),
        "address".to_string(),
        format!("name={}", config.name),
        "static".to_string(),
        addr.to_string(),
        mask.to_string(),
    ]);
    if let Some(gateway) = config.gateway {
        inv = inv
            .arg(gateway.to_string())
            .arg(format!("gwmetric={}", config.gateway_metric.max(1)));
    }
    inv
}

fn netsh_retransmit(name: &str, ms: u32) -> Invocation {
    Invocation::new("netsh").args([
        "interface".to_string(),
        "ipv4".to_string(),
        "set".to_string(),
        "interface".to_string(),
        format!("interface={}", name),
        format!("retransmittime={}", ms),
    ])
}
