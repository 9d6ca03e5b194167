//! In-memory packet-ring driver.
//!
//! [`LoopbackDriver`] implements [`RingDriver`] without a kernel: adapters
//! are table entries and each session owns a byte budget equal to its ring
//! capacity.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::io;
use std::num::NonZeroUsize;
use std::ptr::{self, NonNull};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Guid;
use crate::error::{Error, Result};
use crate::ring::codes::{ERROR_ACCESS_DENIED, ERROR_BUFFER_OVERFLOW, ERROR_FILE_NOT_FOUND, ERROR_NO_MORE_ITEMS};
use crate::ring::{RawAdapter, RawSession, RingDriver};

/// Counters of driver calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Successful opens of an existing adapter.
    pub opened: usize,
    /// Adapters created.
    pub created: usize,
    /// Adapter handles closed.
    pub closed: usize,
    /// Sessions started.
    pub sessions_started: usize,
    /// Sessions ended.
    pub sessions_ended: usize,
    /// Send packets handed out.
    pub allocated: usize,
    /// Packets sent.
    pub sent: usize,
    /// Packets handed to a receiver.
    pub received: usize,
    /// Received packets released.
    pub released: usize,
}

/// An in-memory ring driver.
///
/// Every sent packet is queued on the receive side of the same session, and
/// ring space stays accounted until the looped-back packet is released, so
/// a session whose receive side is never drained fills up exactly like a
/// real one. Sending or releasing a packet the driver did not hand out
/// panics.
#[derive(Debug)]
pub struct LoopbackDriver {
    inner: Mutex<Inner>,
    fail_create: Option<i32>,
    version: u32,
}

#[derive(Debug, Default)]
struct Inner {
    adapters: HashSet<String>,
    handles: HashMap<usize, String>,
    sessions: HashMap<usize, Ring>,
    next_handle: usize,
    stats: LoopbackStats,
}

#[derive(Debug, Default)]
struct Ring {
    capacity: usize,
    used: usize,
    ready: VecDeque<Buffer>,
    allocated: HashMap<usize, Buffer>,
    leased: HashMap<usize, Buffer>,
}

/// A heap packet handed out by raw pointer.
#[derive(Debug)]
struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the buffer is uniquely owned; access goes through the driver lock
// or through the single lease holding its pointer.
unsafe impl Send for Buffer {}

impl Buffer {
    fn zeroed(len: usize) -> Self {
        Self::from_box(vec![0u8; len].into_boxed_slice())
    }

    fn copy_of(data: &[u8]) -> Self {
        Self::from_box(data.into())
    }

    fn from_box(data: Box<[u8]>) -> Self {
        let len = data.len();
        let ptr = NonNull::from(Box::leak(data)).cast::<u8>();
        Self { ptr, len }
    }

    fn key(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: ptr and len come from a leaked Box<[u8]>.
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len)) });
    }
}

impl Inner {
    fn issue(&mut self) -> NonNull<c_void> {
        self.next_handle += 1;
        NonNull::dangling().with_addr(NonZeroUsize::MIN.saturating_add(self.next_handle * 0x10))
    }

    fn ring(&mut self, session: RawSession) -> &mut Ring {
        self.sessions
            .get_mut(&(session.as_ptr() as usize))
            .unwrap_or_else(|| panic!("unknown session {:p}", session.as_ptr()))
    }
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDriver {
    /// Create a driver with no adapters.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            fail_create: None,
            version: 0x0000_000E,
        }
    }

    /// Pre-register an adapter, as if it survived from an earlier run.
    pub fn with_adapter(self, name: &str) -> Self {
        self.lock().adapters.insert(name.to_string());
        self
    }

    /// Make every create call fail with the OS error `code`.
    pub fn fail_create(mut self, code: i32) -> Self {
        self.fail_create = Some(code);
        self
    }

    /// Report `version` as the running driver version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Check if an adapter with this name exists.
    pub fn has_adapter(&self, name: &str) -> bool {
        self.lock().adapters.contains(name)
    }

    /// Counters so far.
    pub fn stats(&self) -> LoopbackStats {
        self.lock().stats
    }

    /// Queue `frame` on the receive side of every running session.
    ///
    /// Returns how many sessions had room for it.
    pub fn inject(&self, frame: &[u8]) -> usize {
        let mut inner = self.lock();
        let mut delivered = 0;
        for ring in inner.sessions.values_mut() {
            if ring.used + frame.len() <= ring.capacity {
                ring.used += frame.len();
                ring.ready.push_back(Buffer::copy_of(frame));
                delivered += 1;
            }
        }
        delivered
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn os_error(operation: &'static str, code: i32) -> Error {
    Error::driver(operation, io::Error::from_raw_os_error(code))
}

impl RingDriver for LoopbackDriver {
    fn open_adapter(&self, name: &str) -> Result<RawAdapter> {
        let mut inner = self.lock();
        if !inner.adapters.contains(name) {
            return Err(os_error("WintunOpenAdapter", ERROR_FILE_NOT_FOUND));
        }
        let handle = inner.issue();
        inner.handles.insert(handle.as_ptr() as usize, name.to_string());
        inner.stats.opened += 1;
        Ok(unsafe { RawAdapter::new(handle) })
    }

    fn create_adapter(&self, name: &str, _tunnel_type: &str, _guid: Option<&Guid>) -> Result<RawAdapter> {
        if let Some(code) = self.fail_create {
            return Err(os_error("WintunCreateAdapter", code));
        }
        let mut inner = self.lock();
        inner.adapters.insert(name.to_string());
        let handle = inner.issue();
        inner.handles.insert(handle.as_ptr() as usize, name.to_string());
        inner.stats.created += 1;
        Ok(unsafe { RawAdapter::new(handle) })
    }

    fn running_driver_version(&self) -> Result<u32> {
        Ok(self.version)
    }

    fn delete_driver(&self) -> Result<()> {
        if !self.lock().handles.is_empty() {
            return Err(os_error("WintunDeleteDriver", ERROR_ACCESS_DENIED));
        }
        Ok(())
    }

    unsafe fn close_adapter(&self, adapter: RawAdapter) {
        let mut inner = self.lock();
        let known = inner.handles.remove(&(adapter.as_ptr() as usize)).is_some();
        assert!(known, "close of unknown adapter {:p}", adapter.as_ptr());
        inner.stats.closed += 1;
    }

    unsafe fn start_session(&self, adapter: RawAdapter, capacity: u32) -> Result<RawSession> {
        let mut inner = self.lock();
        if !inner.handles.contains_key(&(adapter.as_ptr() as usize)) {
            return Err(os_error("WintunStartSession", ERROR_FILE_NOT_FOUND));
        }
        let handle = inner.issue();
        inner.sessions.insert(
            handle.as_ptr() as usize,
            Ring {
                capacity: capacity as usize,
                ..Default::default()
            },
        );
        inner.stats.sessions_started += 1;
        Ok(unsafe { RawSession::new(handle) })
    }

    unsafe fn end_session(&self, session: RawSession) {
        let mut inner = self.lock();
        let ring = inner.sessions.remove(&(session.as_ptr() as usize));
        assert!(ring.is_some(), "end of unknown session {:p}", session.as_ptr());
        inner.stats.sessions_ended += 1;
    }

    unsafe fn allocate_send_packet(&self, session: RawSession, size: u32) -> Result<NonNull<u8>> {
        let mut inner = self.lock();
        let ring = inner.ring(session);
        let size = size as usize;
        if ring.used + size > ring.capacity {
            return Err(os_error("WintunAllocateSendPacket", ERROR_BUFFER_OVERFLOW));
        }
        ring.used += size;
        let buffer = Buffer::zeroed(size);
        let ptr = buffer.ptr;
        ring.allocated.insert(buffer.key(), buffer);
        inner.stats.allocated += 1;
        Ok(ptr)
    }

    unsafe fn send_packet(&self, session: RawSession, packet: NonNull<u8>) {
        let mut inner = self.lock();
        let ring = inner.ring(session);
        let buffer = ring
            .allocated
            .remove(&(packet.as_ptr() as usize))
            .unwrap_or_else(|| panic!("send of unallocated packet {:p}", packet.as_ptr()));
        ring.ready.push_back(buffer);
        inner.stats.sent += 1;
    }

    unsafe fn receive_packet(&self, session: RawSession) -> Result<(NonNull<u8>, u32)> {
        let mut inner = self.lock();
        let ring = inner.ring(session);
        let Some(buffer) = ring.ready.pop_front() else {
            return Err(os_error("WintunReceivePacket", ERROR_NO_MORE_ITEMS));
        };
        let (ptr, len) = (buffer.ptr, buffer.len as u32);
        ring.leased.insert(buffer.key(), buffer);
        inner.stats.received += 1;
        Ok((ptr, len))
    }

    unsafe fn release_receive_packet(&self, session: RawSession, packet: NonNull<u8>) {
        let mut inner = self.lock();
        let ring = inner.ring(session);
        let buffer = ring
            .leased
            .remove(&(packet.as_ptr() as usize))
            .unwrap_or_else(|| panic!("release of unknown packet {:p}", packet.as_ptr()));
        ring.used -= buffer.len;
        inner.stats.released += 1;
    }
}
