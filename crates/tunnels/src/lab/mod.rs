//! Hermetic stand-ins for the driver and the system tools.
//!
//! Enabled with the `lab` feature. [`LoopbackDriver`] implements the ring
//! protocol in memory and loops sent packets back to the receive side;
//! [`RecordingRunner`] records configuration commands instead of running
//! them. Together they exercise [`RingAdapter`](crate::ring::RingAdapter)
//! and [`RouteTable`](crate::route::RouteTable) without privileges.

mod loopback;
mod recording;

pub use loopback::{LoopbackDriver, LoopbackStats};
pub use recording::RecordingRunner;
