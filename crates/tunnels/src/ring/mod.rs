//! Driver-backed adapters exchanging packets through a shared ring.
//!
//! The driver (Wintun or a compatible implementation) owns a ring of
//! wraparound memory per session. Packets are never copied into
//! process-owned buffers by the driver; instead the caller gets a *lease*
//! on ring memory:
//!
//! - [`SendPacket`] from [`RingAdapter::allocate_send_packet`], ended by
//!   [`RingAdapter::send_packet`].
//! - [`RecvPacket`] from [`RingAdapter::receive_packet`], ended by
//!   [`RingAdapter::release_receive_packet`].
//!
//! Leases borrow the adapter and are consumed by the call that ends them, so
//! touching a packet after its lease, or releasing it twice, does not
//! compile.
//!
//! [`RingDriver`] is the seam between the adapter state machine and the
//! driver; [`NativeDriver`] implements it over the vendor library through
//! the [resolver](crate::resolver).

mod adapter;
mod driver;
mod native;
mod packet;

pub use adapter::RingAdapter;
pub use driver::{RawAdapter, RawSession, RingDriver};
pub use native::{NativeDriver, install_logger};
pub use packet::{RecvPacket, SendPacket};

/// Maximum packet size accepted by the driver.
pub const PACKET_SIZE_MAX: u32 = 0xFFFF;

/// Minimum ring capacity (128 KiB).
pub const RING_CAPACITY_MIN: u32 = 0x2_0000;

/// Maximum ring capacity (64 MiB).
pub const RING_CAPACITY_MAX: u32 = 0x400_0000;

/// Maximum adapter name length in UTF-16 units, including the terminator.
pub const ADAPTER_NAME_MAX: usize = 128;

/// Windows error codes the ring protocol reports through the thread's last
/// error.
pub mod codes {
    /// The adapter does not exist.
    pub const ERROR_FILE_NOT_FOUND: i32 = 2;
    /// Access denied.
    pub const ERROR_ACCESS_DENIED: i32 = 5;
    /// The ring is corrupt.
    pub const ERROR_INVALID_DATA: i32 = 13;
    /// The adapter is terminating.
    pub const ERROR_HANDLE_EOF: i32 = 38;
    /// No room in the send ring.
    pub const ERROR_BUFFER_OVERFLOW: i32 = 111;
    /// The receive ring is empty.
    pub const ERROR_NO_MORE_ITEMS: i32 = 259;
}
