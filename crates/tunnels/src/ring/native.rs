//! [`RingDriver`] over the vendor driver library.

use std::ffi::c_void;
use std::io;
use std::mem;
use std::path::PathBuf;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use super::driver::{RawAdapter, RawSession, RingDriver};
use crate::config::Guid;
use crate::error::{Error, Result};
use crate::resolver::{Library, ModuleHandle, Proc};

type CreateAdapterFn =
    unsafe extern "system" fn(name: *const u16, tunnel_type: *const u16, guid: *const Guid) -> *mut c_void;
type OpenAdapterFn = unsafe extern "system" fn(name: *const u16) -> *mut c_void;
type CloseAdapterFn = unsafe extern "system" fn(adapter: *mut c_void);
type DeleteDriverFn = unsafe extern "system" fn() -> i32;
type GetRunningDriverVersionFn = unsafe extern "system" fn() -> u32;
type StartSessionFn = unsafe extern "system" fn(adapter: *mut c_void, capacity: u32) -> *mut c_void;
type EndSessionFn = unsafe extern "system" fn(session: *mut c_void);
type AllocateSendPacketFn = unsafe extern "system" fn(session: *mut c_void, size: u32) -> *mut u8;
type SendPacketFn = unsafe extern "system" fn(session: *mut c_void, packet: *const u8);
type ReceivePacketFn = unsafe extern "system" fn(session: *mut c_void, size: *mut u32) -> *mut u8;
type ReleaseReceivePacketFn = unsafe extern "system" fn(session: *mut c_void, packet: *const u8);
type LoggerCallback = unsafe extern "system" fn(level: i32, timestamp: u64, message: *const u16);
type SetLoggerFn = unsafe extern "system" fn(callback: Option<LoggerCallback>);

/// Driver log levels.
const LOG_INFO: i32 = 0;
const LOG_WARN: i32 = 1;

/// Entry points, resolved on first use and cached.
#[derive(Debug)]
struct EntryPoints {
    create_adapter: Proc,
    open_adapter: Proc,
    close_adapter: Proc,
    delete_driver: Proc,
    get_running_driver_version: Proc,
    start_session: Proc,
    end_session: Proc,
    allocate_send_packet: Proc,
    send_packet: Proc,
    receive_packet: Proc,
    release_receive_packet: Proc,
}

impl EntryPoints {
    const fn new() -> Self {
        Self {
            create_adapter: Proc::new("WintunCreateAdapter"),
            open_adapter: Proc::new("WintunOpenAdapter"),
            close_adapter: Proc::new("WintunCloseAdapter"),
            delete_driver: Proc::new("WintunDeleteDriver"),
            get_running_driver_version: Proc::new("WintunGetRunningDriverVersion"),
            start_session: Proc::new("WintunStartSession"),
            end_session: Proc::new("WintunEndSession"),
            allocate_send_packet: Proc::new("WintunAllocateSendPacket"),
            send_packet: Proc::new("WintunSendPacket"),
            receive_packet: Proc::new("WintunReceivePacket"),
            release_receive_packet: Proc::new("WintunReleaseReceivePacket"),
        }
    }
}

/// The vendor driver, loaded lazily from a shared library.
///
/// Nothing touches the library until the first driver call. Loading and
/// each entry-point lookup happen at most once, even under concurrent first
/// use; afterwards every call is a cached function-pointer invocation.
///
/// Share one `NativeDriver` (in an `Arc`) between all adapters of a process.
#[derive(Debug)]
pub struct NativeDriver {
    library: Arc<Library>,
    entries: EntryPoints,
}

impl NativeDriver {
    /// Prepare to load the driver library from `path`.
    ///
    /// Driver log messages are forwarded to `tracing` once the library is
    /// loaded.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self::with_library(Arc::new(Library::new(path).on_load(install_logger)))
    }

    /// Use an existing library registry.
    ///
    /// Attach [`install_logger`] as its load hook to receive driver logs.
    pub fn with_library(library: Arc<Library>) -> Self {
        Self {
            library,
            entries: EntryPoints::new(),
        }
    }

    /// The underlying library.
    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    /// Resolve `proc` and reinterpret it as the function pointer type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be the `extern "system"` signature the export actually has.
    unsafe fn entry<F: Copy>(&self, proc: &Proc) -> Result<F> {
        debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut c_void>());
        let symbol = proc.find(&self.library)?;
        let addr = symbol.as_ptr();
        // SAFETY: the caller guarantees F is a function pointer of the
        // export's signature; `addr` is non-null.
        Ok(unsafe { mem::transmute_copy::<*mut c_void, F>(&addr) })
    }

    /// Resolve a procedure with no error channel of its own. A missing
    /// export is logged and the call skipped.
    unsafe fn entry_or_log<F: Copy>(&self, proc: &Proc) -> Option<F> {
        match unsafe { self.entry::<F>(proc) } {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::error!("{} unavailable: {}", proc.name(), e);
                None
            }
        }
    }
}

impl RingDriver for NativeDriver {
    fn open_adapter(&self, name: &str) -> Result<RawAdapter> {
        let open: OpenAdapterFn = unsafe { self.entry(&self.entries.open_adapter)? };
        let name = to_wide(name)?;
        let handle = unsafe { open(name.as_ptr()) };
        let err = io::Error::last_os_error();
        unsafe { RawAdapter::from_ptr(handle) }.ok_or_else(|| Error::driver("WintunOpenAdapter", err))
    }

    fn create_adapter(&self, name: &str, tunnel_type: &str, guid: Option<&Guid>) -> Result<RawAdapter> {
        let create: CreateAdapterFn = unsafe { self.entry(&self.entries.create_adapter)? };
        let name = to_wide(name)?;
        let tunnel_type = to_wide(tunnel_type)?;
        let guid = guid.map_or(ptr::null(), |g| g as *const Guid);
        let handle = unsafe { create(name.as_ptr(), tunnel_type.as_ptr(), guid) };
        let err = io::Error::last_os_error();
        unsafe { RawAdapter::from_ptr(handle) }.ok_or_else(|| Error::driver("WintunCreateAdapter", err))
    }

    fn running_driver_version(&self) -> Result<u32> {
        let get: GetRunningDriverVersionFn = unsafe { self.entry(&self.entries.get_running_driver_version)? };
        let version = unsafe { get() };
        if version == 0 {
            return Err(Error::driver("WintunGetRunningDriverVersion", io::Error::last_os_error()));
        }
        Ok(version)
    }

    fn delete_driver(&self) -> Result<()> {
        let delete: DeleteDriverFn = unsafe { self.entry(&self.entries.delete_driver)? };
        if unsafe { delete() } == 0 {
            return Err(Error::driver("WintunDeleteDriver", io::Error::last_os_error()));
        }
        Ok(())
    }

    unsafe fn close_adapter(&self, adapter: RawAdapter) {
        if let Some(close) = unsafe { self.entry_or_log::<CloseAdapterFn>(&self.entries.close_adapter) } {
            unsafe { close(adapter.as_ptr()) };
        }
    }

    unsafe fn start_session(&self, adapter: RawAdapter, capacity: u32) -> Result<RawSession> {
        let start: StartSessionFn = unsafe { self.entry(&self.entries.start_session)? };
        let handle = unsafe { start(adapter.as_ptr(), capacity) };
        let err = io::Error::last_os_error();
        unsafe { RawSession::from_ptr(handle) }.ok_or_else(|| Error::driver("WintunStartSession", err))
    }

    unsafe fn end_session(&self, session: RawSession) {
        if let Some(end) = unsafe { self.entry_or_log::<EndSessionFn>(&self.entries.end_session) } {
            unsafe { end(session.as_ptr()) };
        }
    }

    unsafe fn allocate_send_packet(&self, session: RawSession, size: u32) -> Result<NonNull<u8>> {
        let allocate: AllocateSendPacketFn = unsafe { self.entry(&self.entries.allocate_send_packet)? };
        let packet = unsafe { allocate(session.as_ptr(), size) };
        let err = io::Error::last_os_error();
        NonNull::new(packet).ok_or_else(|| Error::driver("WintunAllocateSendPacket", err))
    }

    unsafe fn send_packet(&self, session: RawSession, packet: NonNull<u8>) {
        if let Some(send) = unsafe { self.entry_or_log::<SendPacketFn>(&self.entries.send_packet) } {
            unsafe { send(session.as_ptr(), packet.as_ptr()) };
        }
    }

    unsafe fn receive_packet(&self, session: RawSession) -> Result<(NonNull<u8>, u32)> {
        let receive: ReceivePacketFn = unsafe { self.entry(&self.entries.receive_packet)? };
        let mut size = 0u32;
        let packet = unsafe { receive(session.as_ptr(), &mut size) };
        let err = io::Error::last_os_error();
        let packet = NonNull::new(packet).ok_or_else(|| Error::driver("WintunReceivePacket", err))?;
        Ok((packet, size))
    }

    unsafe fn release_receive_packet(&self, session: RawSession, packet: NonNull<u8>) {
        if let Some(release) =
            unsafe { self.entry_or_log::<ReleaseReceivePacketFn>(&self.entries.release_receive_packet) }
        {
            unsafe { release(session.as_ptr(), packet.as_ptr()) };
        }
    }
}

/// Load hook that routes the driver's log output into `tracing`.
///
/// A library without the logger export still loads; the omission is logged.
pub fn install_logger(library: &Library, module: ModuleHandle) {
    match library.lookup(module, "WintunSetLogger") {
        Ok(symbol) => {
            // SAFETY: WintunSetLogger has the SetLoggerFn signature.
            let set_logger = unsafe { mem::transmute::<*mut c_void, SetLoggerFn>(symbol.as_ptr()) };
            unsafe { set_logger(Some(log_message)) };
        }
        Err(e) => tracing::warn!("driver log forwarding unavailable: {}", e),
    }
}

unsafe extern "system" fn log_message(level: i32, _timestamp: u64, message: *const u16) {
    if message.is_null() {
        return;
    }
    let text = unsafe { from_wide(message) };
    match level {
        LOG_INFO => tracing::info!(target: "tunnels::driver", "{}", text),
        LOG_WARN => tracing::warn!(target: "tunnels::driver", "{}", text),
        _ => tracing::error!(target: "tunnels::driver", "{}", text),
    }
}

/// Encode `s` as NUL-terminated UTF-16.
fn to_wide(s: &str) -> Result<Vec<u16>> {
    if s.contains('\0') {
        return Err(Error::InvalidName(s.to_string()));
    }
    Ok(s.encode_utf16().chain(Some(0)).collect())
}

/// Decode a NUL-terminated UTF-16 string.
///
/// # Safety
///
/// `ptr` must point to a NUL-terminated UTF-16 buffer.
unsafe fn from_wide(ptr: *const u16) -> String {
    let mut len = 0;
    while unsafe { *ptr.add(len) } != 0 {
        len += 1;
    }
    String::from_utf16_lossy(unsafe { slice::from_raw_parts(ptr, len) })
}
