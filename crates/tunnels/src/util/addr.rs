//! Address parsing and netmask helpers.

use std::net::{IpAddr, Ipv4Addr};

use crate::error::{Error, Result};

/// Parse an IP address from string.
pub fn parse_addr(s: &str) -> Result<IpAddr> {
    s.trim()
        .parse()
        .map_err(|_| Error::InvalidAddress(s.to_string()))
}

/// Parse an IP address with prefix length (CIDR notation).
/// Returns (address, prefix_length).
pub fn parse_prefix(s: &str) -> Result<(IpAddr, u8)> {
    if let Some((addr_str, prefix_str)) = s.split_once('/') {
        let addr = parse_addr(addr_str)?;
        let prefix: u8 = prefix_str
            .parse()
            .map_err(|_| Error::InvalidAddress(s.to_string()))?;

        let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max_prefix {
            return Err(Error::InvalidAddress(format!(
                "{}: prefix {} exceeds maximum {} for address family",
                s, prefix, max_prefix
            )));
        }

        Ok((addr, prefix))
    } else {
        // No prefix specified, host route
        let addr = parse_addr(s)?;
        let prefix = if addr.is_ipv4() { 32 } else { 128 };
        Ok((addr, prefix))
    }
}

/// Convert an IPv4 prefix length into a dotted netmask.
pub fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    match prefix {
        0 => Ipv4Addr::UNSPECIFIED,
        p if p >= 32 => Ipv4Addr::BROADCAST,
        p => Ipv4Addr::from(!0u32 << (32 - p)),
    }
}

/// Convert a dotted netmask into a prefix length.
///
/// Rejects non-contiguous masks such as `255.0.255.0`.
pub fn netmask_to_prefix(mask: Ipv4Addr) -> Result<u8> {
    let bits = u32::from(mask);
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) != 0 {
        return Err(Error::InvalidAddress(format!(
            "non-contiguous netmask {}",
            mask
        )));
    }
    Ok(prefix as u8)
}
