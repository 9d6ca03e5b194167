//! Packet ring integration tests.
//!
//! Drive `RingAdapter` through complete sessions over the in-memory
//! loopback driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tunnels::lab::{LoopbackDriver, RecordingRunner};
use tunnels::ring::{PACKET_SIZE_MAX, RING_CAPACITY_MAX, RING_CAPACITY_MIN, RingAdapter};
use tunnels::{AdapterConfig, AdapterState, Error, Interface, Result};

fn open(driver: &Arc<LoopbackDriver>, name: &str) -> Result<RingAdapter> {
    let runner = Arc::new(RecordingRunner::new());
    let mut adapter = RingAdapter::new(driver.clone(), AdapterConfig::new(name)).with_runner(runner);
    adapter.create_or_open()?;
    Ok(adapter)
}

#[test]
fn test_send_then_receive() -> Result<()> {
    let driver = Arc::new(LoopbackDriver::new());
    let mut adapter = open(&driver, "wg0")?;
    adapter.start_session(RING_CAPACITY_MIN)?;

    let frame: Vec<u8> = (0..=255).collect();
    let mut packet = adapter.allocate_send_packet(frame.len())?;
    packet.copy_from_slice(&frame);
    adapter.send_packet(packet);

    let received = adapter.receive_packet()?;
    assert_eq!(&received[..], &frame[..]);
    adapter.release_receive_packet(received);

    assert!(matches!(adapter.receive_packet(), Err(Error::NoPacketAvailable)));

    adapter.end_session()?;
    adapter.delete()?;
    assert_eq!(adapter.state(), AdapterState::Destroyed);

    let stats = driver.stats();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.received, 1);
    assert_eq!(stats.released, 1);
    Ok(())
}

#[test]
fn test_interface_round_trip() -> Result<()> {
    let driver = Arc::new(LoopbackDriver::new());
    let mut adapter = open(&driver, "wg0")?;
    adapter.up()?;

    assert_eq!(adapter.write_packet(&[0x45, 0, 0, 20])?, 4);

    let mut buf = [0u8; 2];
    // Longer packets are truncated to the buffer and still released.
    assert_eq!(adapter.read_packet(&mut buf)?, 2);
    assert_eq!(buf, [0x45, 0]);
    assert_eq!(driver.stats().released, 1);

    let err = adapter.read_packet(&mut buf).unwrap_err();
    assert!(err.is_would_block());
    Ok(())
}

#[test]
fn test_injected_packets_arrive_in_order() -> Result<()> {
    let driver = Arc::new(LoopbackDriver::new());
    let mut adapter = open(&driver, "wg0")?;
    adapter.up()?;

    for i in 0..5u8 {
        assert_eq!(driver.inject(&[i; 3]), 1);
    }
    for i in 0..5u8 {
        let packet = adapter.receive_packet()?;
        assert_eq!(&packet[..], &[i; 3]);
        adapter.release_receive_packet(packet);
    }
    Ok(())
}

#[test]
fn test_every_capacity_in_range_starts_and_ends() -> Result<()> {
    let driver = Arc::new(LoopbackDriver::new());
    let mut adapter = open(&driver, "wg0")?;

    let interior = RING_CAPACITY_MIN + (RING_CAPACITY_MAX - RING_CAPACITY_MIN) / 3;
    for capacity in [RING_CAPACITY_MIN, RING_CAPACITY_MIN + 1, interior, RING_CAPACITY_MAX] {
        adapter.start_session(capacity)?;
        assert_eq!(adapter.state(), AdapterState::Active);

        // The session is usable at every size.
        let packet = adapter.allocate_send_packet(64)?;
        adapter.send_packet(packet);
        let received = adapter.receive_packet()?;
        assert_eq!(received.len(), 64);
        adapter.release_receive_packet(received);

        adapter.end_session()?;
        assert_eq!(adapter.state(), AdapterState::Bound);
    }
    Ok(())
}

#[test]
fn test_reopen_existing_adapter() -> Result<()> {
    let driver = Arc::new(LoopbackDriver::new());
    {
        let mut first = open(&driver, "wg0")?;
        first.up()?;
    }
    let second = open(&driver, "wg0")?;
    assert_eq!(second.state(), AdapterState::Bound);

    let stats = driver.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.opened, 1);
    Ok(())
}

#[test]
fn test_operations_outside_session_fail_fast() -> Result<()> {
    let driver = Arc::new(LoopbackDriver::new());
    let adapter = open(&driver, "wg0")?;

    assert!(matches!(
        adapter.allocate_send_packet(20),
        Err(Error::InvalidState {
            state: AdapterState::Bound,
            ..
        })
    ));
    assert!(matches!(
        adapter.receive_packet(),
        Err(Error::InvalidState {
            state: AdapterState::Bound,
            ..
        })
    ));
    assert_eq!(driver.stats().allocated, 0);
    Ok(())
}

#[test]
fn test_driver_version_and_removal() -> Result<()> {
    let driver = Arc::new(LoopbackDriver::new().with_version(0x0000_000E));
    let mut adapter = open(&driver, "wg0")?;
    assert_eq!(adapter.running_driver_version()?, 0x0000_000E);

    // Still in use.
    assert!(adapter.delete_driver().is_err());
    adapter.delete()?;
    adapter.delete_driver()?;
    Ok(())
}

/// The receive path and the send path share one adapter across threads.
#[test]
fn test_concurrent_send_and_receive() -> Result<()> {
    const COUNT: usize = 1000;

    let driver = Arc::new(LoopbackDriver::new());
    let mut adapter = open(&driver, "wg0")?;
    adapter.start_session(RING_CAPACITY_MIN)?;
    let adapter = &adapter;
    let done = AtomicBool::new(false);

    std::thread::scope(|s| {
        let receiver = s.spawn(|| -> Result<usize> {
            let deadline = Instant::now() + Duration::from_secs(10);
            let mut seen = 0;
            while seen < COUNT && Instant::now() < deadline {
                match adapter.receive_packet() {
                    Ok(packet) => {
                        assert_eq!(packet.len(), 64);
                        assert_eq!(packet[0], (seen % 256) as u8);
                        adapter.release_receive_packet(packet);
                        seen += 1;
                    }
                    Err(e) if e.is_would_block() => std::thread::yield_now(),
                    Err(e) => return Err(e),
                }
            }
            done.store(true, Ordering::SeqCst);
            Ok(seen)
        });

        let mut sent = 0;
        while sent < COUNT && !done.load(Ordering::SeqCst) {
            match adapter.allocate_send_packet(64) {
                Ok(mut packet) => {
                    packet.fill((sent % 256) as u8);
                    adapter.send_packet(packet);
                    sent += 1;
                }
                Err(e) if e.is_would_block() => std::thread::yield_now(),
                Err(e) => panic!("allocate failed: {e}"),
            }
        }

        let seen = receiver.join().expect("receiver panicked")?;
        assert_eq!(seen, COUNT);
        Ok(())
    })
}

#[test]
fn test_ring_fills_and_drains() -> Result<()> {
    let driver = Arc::new(LoopbackDriver::new());
    let mut adapter = open(&driver, "wg0")?;
    adapter.start_session(RING_CAPACITY_MIN)?;

    let size = PACKET_SIZE_MAX as usize;
    let mut queued = 0;
    loop {
        match adapter.allocate_send_packet(size) {
            Ok(packet) => {
                adapter.send_packet(packet);
                queued += 1;
            }
            Err(e) if e.is_would_block() => break,
            Err(e) => return Err(e),
        }
    }
    assert!(queued > 0);

    for _ in 0..queued {
        let packet = adapter.receive_packet()?;
        adapter.release_receive_packet(packet);
    }
    let packet = adapter.allocate_send_packet(size)?;
    adapter.send_packet(packet);
    Ok(())
}
