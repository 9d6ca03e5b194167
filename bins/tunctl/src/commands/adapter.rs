//! tunctl create/delete/driver-version implementation.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use tunnels::ring::{NativeDriver, RingDriver};
use tunnels::util::parse_prefix;
use tunnels::{AdapterConfig, Guid, Interface};

#[derive(Args)]
pub struct CreateCmd {
    /// Adapter name (empty lets the kernel choose one).
    #[arg(default_value = "")]
    name: String,

    /// Load settings from a JSON file; flags override it.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// IPv4 address.
    #[arg(long)]
    address: Option<Ipv4Addr>,

    /// IPv4 netmask.
    #[arg(long)]
    netmask: Option<Ipv4Addr>,

    /// IPv6 address with prefix length (e.g., fd00::1/64).
    #[arg(long)]
    ipv6: Option<String>,

    /// Default gateway (packet-ring adapters).
    #[arg(long)]
    gateway: Option<IpAddr>,

    /// Link MTU.
    #[arg(long)]
    mtu: Option<u32>,

    /// Transmit queue length.
    #[arg(long = "txqueuelen")]
    tx_queue_len: Option<u32>,

    /// Owner UID.
    #[arg(long)]
    owner: Option<u32>,

    /// Group GID.
    #[arg(long)]
    group: Option<u32>,

    /// Enable multi-queue support.
    #[arg(long)]
    multi_queue: bool,

    /// Adapter identity (packet-ring adapters).
    #[arg(long)]
    guid: Option<Guid>,

    /// Ring capacity in bytes (packet-ring adapters).
    #[arg(long)]
    ring_capacity: Option<u32>,

    /// Keep the adapter open and log incoming frames until interrupted.
    #[arg(long)]
    hold: bool,
}

impl CreateCmd {
    fn build_config(&self) -> Result<AdapterConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
                let mut config = AdapterConfig::from_json(&text)?;
                if !self.name.is_empty() {
                    config.name = self.name.clone();
                }
                config
            }
            None => AdapterConfig::new(&self.name),
        };

        if let Some(addr) = self.address {
            config = config.ipv4_address(addr);
        }
        if let Some(mask) = self.netmask {
            config = config.netmask(mask);
        }
        if let Some(ref ipv6) = self.ipv6 {
            match parse_prefix(ipv6)? {
                (IpAddr::V6(addr), prefix) => config = config.ipv6_address(addr, prefix),
                (IpAddr::V4(_), _) => bail!("--ipv6 needs an IPv6 address, got {}", ipv6),
            }
        }
        if let Some(gateway) = self.gateway {
            config = config.gateway(gateway);
        }
        if let Some(mtu) = self.mtu {
            config = config.mtu(mtu);
        }
        if let Some(len) = self.tx_queue_len {
            config = config.tx_queue_len(len);
        }
        if let Some(uid) = self.owner {
            config = config.owner(uid);
        }
        if let Some(gid) = self.group {
            config = config.group(gid);
        }
        if self.multi_queue {
            config = config.multi_queue(true);
        }
        if let Some(guid) = self.guid {
            config = config.guid(guid);
        }
        if let Some(capacity) = self.ring_capacity {
            config = config.ring_capacity(capacity);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn run(&self, driver: &str) -> Result<()> {
        let config = self.build_config()?;
        // Without --hold the adapter must outlive this process.
        let mut adapter = open(config, driver, !self.hold)?;
        adapter.configure().context("configuring adapter")?;
        println!("{}", adapter.name());

        if self.hold {
            hold(adapter.as_mut())?;
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct DeleteCmd {
    /// Adapter name.
    name: String,
}

impl DeleteCmd {
    pub fn run(&self, driver: &str) -> Result<()> {
        let mut adapter = open(AdapterConfig::new(&self.name), driver, true)?;
        adapter
            .delete()
            .with_context(|| format!("deleting {}", self.name))?;
        Ok(())
    }
}

/// Print the running driver version as `major.minor`.
pub fn driver_version(driver: &str) -> Result<()> {
    let driver = NativeDriver::load(driver);
    let version = driver.running_driver_version()?;
    println!("{}.{}", version >> 16, version & 0xffff);
    Ok(())
}

#[cfg(target_os = "linux")]
fn open(config: AdapterConfig, _driver: &str, persist: bool) -> Result<Box<dyn Interface>> {
    use tunnels::tuntap::TunDevice;

    let persistent = persist || config.persistent;
    let device = TunDevice::create(config.persistent(persistent)).context("opening TUN device")?;
    Ok(Box::new(device))
}

#[cfg(not(target_os = "linux"))]
fn open(config: AdapterConfig, driver: &str, _persist: bool) -> Result<Box<dyn Interface>> {
    use std::sync::Arc;
    use tunnels::ring::RingAdapter;

    let adapter = RingAdapter::open(Arc::new(NativeDriver::load(driver)), config).context("opening adapter")?;
    Ok(Box::new(adapter))
}

fn hold(adapter: &mut dyn Interface) -> Result<()> {
    let mut buf = vec![0u8; 65535];
    let mut frames = 0u64;
    loop {
        match adapter.read_packet(&mut buf) {
            Ok(len) => {
                frames += 1;
                tracing::info!(len, frames, "frame");
            }
            Err(e) if e.is_would_block() => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => return Err(e.into()),
        }
    }
}
