//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

/// Global counter for unique interface names.
static NAME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate an interface name unique to this process and test.
///
/// Kept under 16 bytes so it fits an `ifreq`.
pub fn unique_ifname(prefix: &str) -> String {
    let id = NAME_COUNTER.fetch_add(1, Ordering::SeqCst);
    let pid = std::process::id() % 10_000;
    format!("{}{}{}", prefix, pid, id)
}

/// Check if a kernel interface exists.
pub fn link_exists(name: &str) -> bool {
    Path::new("/sys/class/net").join(name).exists()
}

/// Read an attribute of a kernel interface from sysfs.
pub fn link_attr(name: &str, attr: &str) -> Option<String> {
    std::fs::read_to_string(Path::new("/sys/class/net").join(name).join(attr))
        .ok()
        .map(|s| s.trim().to_string())
}

/// Run `ip` with arguments and return stdout.
pub fn ip(args: &[&str]) -> String {
    let output = Command::new("ip").args(args).output().expect("failed to run ip");
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Delete a link, ignoring errors.
pub fn ip_link_delete(name: &str) {
    let _ = Command::new("ip").args(["link", "delete", name]).output();
}

/// Check if running as root.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Skip the test if not running as root.
///
/// Use this at the beginning of integration tests that require root privileges.
#[macro_export]
macro_rules! require_root {
    () => {
        if !crate::common::is_root() {
            eprintln!("Skipping test: requires root");
            return Ok(());
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ifname() {
        let name1 = unique_ifname("tt");
        let name2 = unique_ifname("tt");
        assert_ne!(name1, name2);
        assert!(name1.len() < 16);
    }
}
