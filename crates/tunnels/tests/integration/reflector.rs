//! Raw-socket reflector integration tests.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::OwnedFd;
use std::time::Duration;

use tunnels::Result;
use tunnels::rawsock::{DEFAULT_BUFFER_SIZE, RawSocketConfig, RawSocketLink, reflect_target};

/// An IPv4 + TCP-ish header pair addressed to `dst`.
fn frame(dst: SocketAddrV4, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 24];
    frame[0] = 0x45;
    frame[9] = 6;
    frame[12..16].copy_from_slice(&[127, 0, 0, 1]);
    frame[16..20].copy_from_slice(&dst.ip().octets());
    frame[20..22].copy_from_slice(&12345u16.to_be_bytes());
    frame[22..24].copy_from_slice(&dst.port().to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[test]
fn test_reflect_through_datagram_sockets() -> Result<()> {
    let target = UdpSocket::bind("127.0.0.1:0")?;
    target.set_read_timeout(Some(Duration::from_secs(5)))?;
    let port = target.local_addr()?.port();

    let recv = UdpSocket::bind("127.0.0.1:0")?;
    recv.set_nonblocking(true)?;
    let send = UdpSocket::bind("127.0.0.1:0")?;
    let mut link = RawSocketLink::from_fds(OwnedFd::from(recv), OwnedFd::from(send), DEFAULT_BUFFER_SIZE);

    let dst = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
    let f = frame(dst, b"hello");
    assert_eq!(reflect_target(&f)?, dst);
    link.write(&f)?;

    let mut buf = [0u8; 256];
    let n = target.recv(&mut buf)?;
    assert_eq!(&buf[..n], &f[..]);
    Ok(())
}

#[test]
fn test_create_on_loopback() -> Result<()> {
    require_root!();

    let link = RawSocketLink::create(&RawSocketConfig::new("lo"))?;
    let mut buf = [0u8; 128];
    // Nothing was sent to us yet; a non-blocking read must not hang.
    match link.read(&mut buf) {
        Ok(_) => {}
        Err(e) => assert!(e.is_would_block(), "unexpected error: {e}"),
    }
    Ok(())
}

#[test]
fn test_create_on_missing_interface() -> Result<()> {
    require_root!();

    let err = RawSocketLink::create(&RawSocketConfig::new("nonexistent0")).unwrap_err();
    assert!(matches!(err, tunnels::Error::SocketUnavailable { operation: "SO_BINDTODEVICE", .. }));
    Ok(())
}
