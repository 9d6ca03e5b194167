//! Shared utilities for tunnels.

pub mod addr;
pub mod ifname;

pub use addr::{netmask_to_prefix, parse_addr, parse_prefix, prefix_to_netmask};
pub use ifname::validate;
