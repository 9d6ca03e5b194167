//! Leases on ring memory.

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use super::driver::{RawSession, RingDriver};

/// A writable region of the send ring, obtained from
/// [`RingAdapter::allocate_send_packet`](super::RingAdapter::allocate_send_packet).
///
/// Fill it through `DerefMut` and hand it back with
/// [`RingAdapter::send_packet`](super::RingAdapter::send_packet). The lease
/// is consumed by sending, so the memory cannot be touched afterwards:
///
/// ```compile_fail
/// # fn demo(adapter: &tunnels::ring::RingAdapter) -> tunnels::Result<()> {
/// let mut packet = adapter.allocate_send_packet(20)?;
/// packet[0] = 0x45;
/// adapter.send_packet(packet);
/// packet[1] = 0; // use after send
/// # Ok(())
/// # }
/// ```
///
/// The ring slot is reserved in order; a lease dropped without being sent
/// would stall every later packet, so `Drop` submits it zero-filled.
pub struct SendPacket<'a> {
    driver: &'a dyn RingDriver,
    session: RawSession,
    data: NonNull<u8>,
    len: usize,
    _lease: PhantomData<&'a mut [u8]>,
}

impl<'a> SendPacket<'a> {
    /// # Safety
    ///
    /// `data` must be a fresh allocation of `len` bytes from
    /// `driver.allocate_send_packet(session, ..)`.
    pub(crate) unsafe fn new(driver: &'a dyn RingDriver, session: RawSession, data: NonNull<u8>, len: usize) -> Self {
        Self {
            driver,
            session,
            data,
            len,
            _lease: PhantomData,
        }
    }

    /// Submit the packet.
    pub(crate) fn send(self) {
        let this = ManuallyDrop::new(self);
        // SAFETY: the lease is consumed here, so the allocation is submitted
        // exactly once and never touched again.
        unsafe { this.driver.send_packet(this.session, this.data) };
    }
}

impl Deref for SendPacket<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the driver reserved `len` bytes for this lease.
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl DerefMut for SendPacket<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; the lease is exclusive.
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }
}

impl Drop for SendPacket<'_> {
    fn drop(&mut self) {
        tracing::warn!(len = self.len, "send packet dropped unsent; submitting it zeroed");
        self.fill(0);
        unsafe { self.driver.send_packet(self.session, self.data) };
    }
}

impl fmt::Debug for SendPacket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendPacket").field("len", &self.len).finish()
    }
}

/// A received packet still owned by the ring, obtained from
/// [`RingAdapter::receive_packet`](super::RingAdapter::receive_packet).
///
/// Read it through `Deref` and return it with
/// [`RingAdapter::release_receive_packet`](super::RingAdapter::release_receive_packet).
/// Dropping the lease releases it too; releasing twice does not compile:
///
/// ```compile_fail
/// # fn demo(adapter: &tunnels::ring::RingAdapter) -> tunnels::Result<()> {
/// let packet = adapter.receive_packet()?;
/// adapter.release_receive_packet(packet);
/// adapter.release_receive_packet(packet);
/// # Ok(())
/// # }
/// ```
pub struct RecvPacket<'a> {
    driver: &'a dyn RingDriver,
    session: RawSession,
    data: NonNull<u8>,
    len: usize,
    _lease: PhantomData<&'a [u8]>,
}

impl<'a> RecvPacket<'a> {
    /// # Safety
    ///
    /// `data` and `len` must come from `driver.receive_packet(session)`.
    pub(crate) unsafe fn new(driver: &'a dyn RingDriver, session: RawSession, data: NonNull<u8>, len: usize) -> Self {
        Self {
            driver,
            session,
            data,
            len,
            _lease: PhantomData,
        }
    }

    /// Return the ring space.
    pub(crate) fn release(self) {
        drop(self);
    }
}

impl Deref for RecvPacket<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the driver handed out `len` readable bytes for this lease.
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl Drop for RecvPacket<'_> {
    fn drop(&mut self) {
        // SAFETY: Drop runs once per lease.
        unsafe { self.driver.release_receive_packet(self.session, self.data) };
    }
}

impl fmt::Debug for RecvPacket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecvPacket").field("len", &self.len).finish()
    }
}
