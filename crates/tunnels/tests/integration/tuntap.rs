//! TUN device integration tests.
//!
//! These create real interfaces and need root.

use std::net::Ipv4Addr;

use tunnels::tuntap::TunDevice;
use tunnels::{AdapterConfig, AdapterState, Interface, Result};

use crate::common::{ip_link_delete, link_attr, link_exists, unique_ifname};

/// Deletes the interface if a test bails out early.
struct Cleanup(String);

impl Drop for Cleanup {
    fn drop(&mut self) {
        if link_exists(&self.0) {
            ip_link_delete(&self.0);
        }
    }
}

#[test]
fn test_create_configure_delete() -> Result<()> {
    require_root!();

    let name = unique_ifname("tt");
    let _cleanup = Cleanup(name.clone());
    let config = AdapterConfig::new(&name)
        .ipv4_address(Ipv4Addr::new(10, 213, 0, 1))
        .netmask(Ipv4Addr::new(255, 255, 255, 0))
        .mtu(1400)
        .tx_queue_len(750)
        .persistent(true);

    let mut tun = TunDevice::create(config)?;
    assert_eq!(tun.name(), name);
    assert!(link_exists(&name));

    tun.configure()?;
    assert_eq!(tun.state(), AdapterState::Active);
    assert_eq!(link_attr(&name, "mtu").as_deref(), Some("1400"));
    assert_eq!(link_attr(&name, "tx_queue_len").as_deref(), Some("750"));

    let flags = link_attr(&name, "flags").unwrap_or_default();
    let flags = u32::from_str_radix(flags.trim_start_matches("0x"), 16).unwrap_or(0);
    assert_ne!(flags & 0x1, 0, "interface should be up");

    let addrs = crate::common::ip(&["-4", "addr", "show", "dev", &name]);
    assert!(addrs.contains("10.213.0.1/24"), "address missing: {addrs}");

    tun.down()?;
    assert_eq!(tun.state(), AdapterState::Bound);

    tun.delete()?;
    assert_eq!(tun.state(), AdapterState::Destroyed);
    assert!(!link_exists(&name));
    Ok(())
}

#[test]
fn test_kernel_assigned_name() -> Result<()> {
    require_root!();

    let mut tun = TunDevice::create(AdapterConfig::new(""))?;
    let _cleanup = Cleanup(tun.name().to_string());
    assert!(tun.name().starts_with("tun"), "got {}", tun.name());
    assert!(link_exists(tun.name()));
    tun.delete()?;
    Ok(())
}

#[test]
fn test_nonblocking_read_would_block() -> Result<()> {
    require_root!();

    let name = unique_ifname("tt");
    let _cleanup = Cleanup(name.clone());
    let mut tun = TunDevice::create(AdapterConfig::new(&name).nonblocking(true))?;

    let mut buf = [0u8; 1500];
    let err = tun.read_packet(&mut buf).unwrap_err();
    assert!(err.is_would_block(), "unexpected error: {err}");
    tun.delete()?;
    Ok(())
}

#[test]
fn test_multi_queue_attach() -> Result<()> {
    require_root!();

    let name = unique_ifname("tq");
    let _cleanup = Cleanup(name.clone());
    let config = AdapterConfig::new(&name).multi_queue(true);

    // Each queue is a separate open of the same interface.
    let mut first = TunDevice::create(config.clone())?;
    let second = TunDevice::create(config)?;
    assert_eq!(first.name(), second.name());

    drop(second);
    first.delete()?;
    Ok(())
}

#[test]
fn test_ipv6_address() -> Result<()> {
    require_root!();

    let name = unique_ifname("t6");
    let _cleanup = Cleanup(name.clone());
    let config = AdapterConfig::new(&name).ipv6_address("fd00:213::1".parse().unwrap(), 64);
    let mut tun = TunDevice::create(config)?;
    tun.up()?;
    tun.configure()?;

    let addrs = crate::common::ip(&["-6", "addr", "show", "dev", &name]);
    assert!(addrs.contains("fd00:213::1/64"), "address missing: {addrs}");
    tun.delete()?;
    Ok(())
}

#[cfg(feature = "async")]
#[tokio::test]
async fn test_async_send_and_receive() -> Result<()> {
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tunnels::tuntap::AsyncTunDevice;

    require_root!();

    let name = unique_ifname("ta");
    let _cleanup = Cleanup(name.clone());
    let config = AdapterConfig::new(&name)
        .ipv4_address(Ipv4Addr::new(10, 214, 0, 1))
        .netmask(Ipv4Addr::new(255, 255, 255, 0));
    let mut tun = TunDevice::create(config)?;
    tun.configure()?;
    let tun = AsyncTunDevice::new(tun)?;

    // A datagram to a peer on the tunnel subnet is routed into the device.
    let socket = UdpSocket::bind("10.214.0.1:0").await?;
    socket.send_to(b"ping", "10.214.0.2:9").await?;

    // Skip whatever else the kernel sends first (router solicitations).
    let mut buf = vec![0u8; 1500];
    let n = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let n = tun.recv(&mut buf).await?;
            if buf[0] >> 4 == 4 && buf[..n].ends_with(b"ping") {
                return Ok::<_, tunnels::Error>(n);
            }
        }
    })
    .await
    .expect("no frame from the tunnel")?;
    assert_eq!(&buf[16..20], &[10, 214, 0, 2]);

    // Writing it back does not fail.
    tun.send(&buf[..n]).await?;

    let mut tun = tun.into_inner();
    tun.delete()?;
    Ok(())
}
