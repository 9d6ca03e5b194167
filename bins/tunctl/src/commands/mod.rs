//! tunctl subcommands.

pub mod adapter;
pub mod route;

#[cfg(target_os = "linux")]
pub mod reflect;
