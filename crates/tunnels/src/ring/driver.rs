//! The driver contract behind [`RingAdapter`](super::RingAdapter).

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use crate::config::Guid;
use crate::error::Result;

/// Opaque adapter handle issued by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawAdapter(NonNull<c_void>);

/// Opaque session handle issued by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawSession(NonNull<c_void>);

// SAFETY: both are opaque driver tokens; the driver accepts them from any
// thread.
unsafe impl Send for RawAdapter {}
unsafe impl Sync for RawAdapter {}
unsafe impl Send for RawSession {}
unsafe impl Sync for RawSession {}

impl RawAdapter {
    /// Wrap a non-null driver handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be an adapter handle issued by the driver it will be passed
    /// back to.
    pub unsafe fn new(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    /// Wrap a driver handle. Returns `None` for null.
    ///
    /// # Safety
    ///
    /// `ptr` must be an adapter handle issued by the driver it will be
    /// passed back to.
    pub unsafe fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// The raw handle.
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl RawSession {
    /// Wrap a non-null driver handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be a session handle issued by the driver it will be passed
    /// back to.
    pub unsafe fn new(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    /// Wrap a driver handle. Returns `None` for null.
    ///
    /// # Safety
    ///
    /// `ptr` must be a session handle issued by the driver it will be passed
    /// back to.
    pub unsafe fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// The raw handle.
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Entry points of a packet-ring driver.
///
/// Failures are reported as [`Error::Driver`](crate::Error::Driver) carrying
/// the OS error code the driver set; [`RingAdapter`](super::RingAdapter)
/// maps the expected ones (empty ring, full ring) to their own variants.
pub trait RingDriver: fmt::Debug + Send + Sync {
    /// Open an existing adapter by name.
    fn open_adapter(&self, name: &str) -> Result<RawAdapter>;

    /// Create an adapter with the given type tag and optional identity.
    fn create_adapter(&self, name: &str, tunnel_type: &str, guid: Option<&Guid>) -> Result<RawAdapter>;

    /// Version of the running driver.
    fn running_driver_version(&self) -> Result<u32>;

    /// Remove the driver from the system if no adapters use it.
    fn delete_driver(&self) -> Result<()>;

    /// Release an adapter handle.
    ///
    /// # Safety
    ///
    /// `adapter` must be open, with no running session, and is invalid
    /// afterwards.
    unsafe fn close_adapter(&self, adapter: RawAdapter);

    /// Start a session with a ring of `capacity` bytes.
    ///
    /// # Safety
    ///
    /// `adapter` must be open.
    unsafe fn start_session(&self, adapter: RawAdapter, capacity: u32) -> Result<RawSession>;

    /// End a session.
    ///
    /// # Safety
    ///
    /// `session` must be running with no outstanding packet leases, and is
    /// invalid afterwards.
    unsafe fn end_session(&self, session: RawSession);

    /// Reserve `size` bytes of the send ring.
    ///
    /// # Safety
    ///
    /// `session` must be running.
    unsafe fn allocate_send_packet(&self, session: RawSession, size: u32) -> Result<NonNull<u8>>;

    /// Hand an allocated packet to the driver. Reports nothing.
    ///
    /// # Safety
    ///
    /// `packet` must come from `allocate_send_packet` on the same session and
    /// must not be used afterwards.
    unsafe fn send_packet(&self, session: RawSession, packet: NonNull<u8>);

    /// Take the next received packet and its size.
    ///
    /// # Safety
    ///
    /// `session` must be running.
    unsafe fn receive_packet(&self, session: RawSession) -> Result<(NonNull<u8>, u32)>;

    /// Return a received packet's ring space.
    ///
    /// # Safety
    ///
    /// `packet` must come from `receive_packet` on the same session, be
    /// released exactly once, and not be used afterwards.
    unsafe fn release_receive_packet(&self, session: RawSession, packet: NonNull<u8>);
}
