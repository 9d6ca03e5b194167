//! Adapter configuration.
//!
//! [`AdapterConfig`] describes the adapter a caller wants: its name,
//! addressing, link parameters and, for the driver-backed variant, the ring
//! capacity and identity. It is consumed at create-or-open time; MTU, queue
//! length and addresses can be re-applied later through [`Interface`].
//!
//! # Example
//!
//! ```ignore
//! use tunnels::AdapterConfig;
//!
//! let config = AdapterConfig::new("niceland")
//!     .ipv4_address("10.4.3.2".parse()?)
//!     .netmask("255.255.255.0".parse()?)
//!     .gateway("10.4.3.1".parse()?)
//!     .mtu(1420)
//!     .tx_queue_len(2000)
//!     .persistent(true);
//! config.validate()?;
//! ```
//!
//! [`Interface`]: crate::Interface

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::str::FromStr;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::ring::{ADAPTER_NAME_MAX, RING_CAPACITY_MAX, RING_CAPACITY_MIN};

/// Default path of the TUN character device.
pub const TUN_DEVICE_PATH: &str = "/dev/net/tun";

/// Default ring capacity (4 MiB).
pub const DEFAULT_RING_CAPACITY: u32 = 0x40_0000;

/// Default adapter type tag passed to the driver on create.
pub const DEFAULT_TUNNEL_TYPE: &str = "Tunnels";

/// Desired adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AdapterConfig {
    /// Adapter name. Empty lets the kernel choose (character device only).
    pub name: String,
    /// IPv4 address.
    pub ipv4_address: Option<Ipv4Addr>,
    /// IPv6 address.
    pub ipv6_address: Option<Ipv6Addr>,
    /// IPv6 prefix length used with `ipv6_address`.
    pub ipv6_prefix: u8,
    /// IPv4 netmask.
    pub netmask: Option<Ipv4Addr>,
    /// Default gateway announced with the address (driver variant).
    pub gateway: Option<IpAddr>,
    /// Gateway metric.
    pub gateway_metric: u32,
    /// Link MTU.
    pub mtu: Option<u32>,
    /// Transmit queue length.
    pub tx_queue_len: Option<u32>,
    /// Owner UID of the character device.
    pub owner: Option<u32>,
    /// Group GID of the character device.
    pub group: Option<u32>,
    /// Request a multi-queue character device.
    pub multi_queue: bool,
    /// Keep the device after the descriptor is closed.
    pub persistent: bool,
    /// Character device path.
    pub device_path: PathBuf,
    /// Open the character device with `O_NONBLOCK`.
    pub nonblocking: bool,
    /// Ring capacity in bytes (driver variant).
    pub ring_capacity: u32,
    /// Adapter type tag (driver variant).
    pub tunnel_type: String,
    /// Stable adapter identity (driver variant).
    pub guid: Option<Guid>,
    /// IPv4 retransmit time in milliseconds (driver variant).
    pub retransmit_ms: Option<u32>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            ipv4_address: None,
            ipv6_address: None,
            ipv6_prefix: 64,
            netmask: None,
            gateway: None,
            gateway_metric: 0,
            mtu: None,
            tx_queue_len: None,
            owner: None,
            group: None,
            multi_queue: false,
            persistent: false,
            device_path: PathBuf::from(TUN_DEVICE_PATH),
            nonblocking: true,
            ring_capacity: DEFAULT_RING_CAPACITY,
            tunnel_type: DEFAULT_TUNNEL_TYPE.to_string(),
            guid: None,
            retransmit_ms: None,
        }
    }
}

impl AdapterConfig {
    /// Create a configuration for the named adapter.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from JSON.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the IPv4 address.
    pub fn ipv4_address(mut self, addr: Ipv4Addr) -> Self {
        self.ipv4_address = Some(addr);
        self
    }

    /// Set the IPv6 address and prefix length.
    pub fn ipv6_address(mut self, addr: Ipv6Addr, prefix: u8) -> Self {
        self.ipv6_address = Some(addr);
        self.ipv6_prefix = prefix;
        self
    }

    /// Set the IPv4 netmask.
    pub fn netmask(mut self, mask: Ipv4Addr) -> Self {
        self.netmask = Some(mask);
        self
    }

    /// Set the gateway.
    pub fn gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the gateway metric.
    pub fn gateway_metric(mut self, metric: u32) -> Self {
        self.gateway_metric = metric;
        self
    }

    /// Set the MTU.
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Set the transmit queue length.
    pub fn tx_queue_len(mut self, len: u32) -> Self {
        self.tx_queue_len = Some(len);
        self
    }

    /// Set the owner UID.
    pub fn owner(mut self, uid: u32) -> Self {
        self.owner = Some(uid);
        self
    }

    /// Set the group GID.
    pub fn group(mut self, gid: u32) -> Self {
        self.group = Some(gid);
        self
    }

    /// Enable multi-queue support.
    pub fn multi_queue(mut self, value: bool) -> Self {
        self.multi_queue = value;
        self
    }

    /// Make the device persistent (survives close).
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Use a different character device path.
    pub fn device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    /// Choose blocking or non-blocking descriptor I/O.
    pub fn nonblocking(mut self, value: bool) -> Self {
        self.nonblocking = value;
        self
    }

    /// Set the packet ring capacity in bytes.
    pub fn ring_capacity(mut self, capacity: u32) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Set the adapter type tag.
    pub fn tunnel_type(mut self, tunnel_type: impl Into<String>) -> Self {
        self.tunnel_type = tunnel_type.into();
        self
    }

    /// Set the stable adapter identity.
    pub fn guid(mut self, guid: Guid) -> Self {
        self.guid = Some(guid);
        self
    }

    /// Set the IPv4 retransmit time.
    pub fn retransmit_ms(mut self, ms: u32) -> Self {
        self.retransmit_ms = Some(ms);
        self
    }

    /// Check the configuration before any kernel or driver call.
    pub fn validate(&self) -> Result<()> {
        let len = self.name.chars().count();
        if len >= ADAPTER_NAME_MAX {
            return Err(Error::NameTooLong {
                name: self.name.clone(),
                len,
                max: ADAPTER_NAME_MAX - 1,
            });
        }
        if self.name.contains('\0') {
            return Err(Error::InvalidName(self.name.clone()));
        }
        if !(RING_CAPACITY_MIN..=RING_CAPACITY_MAX).contains(&self.ring_capacity) {
            return Err(Error::InvalidRingCapacity {
                capacity: self.ring_capacity,
            });
        }
        if self.ipv6_prefix > 128 {
            return Err(Error::InvalidAddress(format!(
                "IPv6 prefix {} exceeds 128",
                self.ipv6_prefix
            )));
        }
        if let Some(mask) = self.netmask {
            crate::util::netmask_to_prefix(mask)?;
        }
        for (what, value) in [("mtu", self.mtu), ("txqueuelen", self.tx_queue_len)] {
            if let Some(value) = value {
                link_int(what, value)?;
            }
        }
        Ok(())
    }
}

/// Adapter identity token, laid out like the Windows `GUID` structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// Build a GUID from its big-endian 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self {
            data1: (value >> 96) as u32,
            data2: (value >> 80) as u16,
            data3: (value >> 64) as u16,
            data4: ((value as u64).to_be_bytes()),
        }
    }

    /// The big-endian 128-bit value.
    pub fn as_u128(&self) -> u128 {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | u64::from_be_bytes(self.data4) as u128
    }
}

impl FromStr for Guid {
    type Err = Error;

    /// Parse `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, optionally in braces.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(s);

        let groups: Vec<&str> = trimmed.split('-').collect();
        let lengths = [8, 4, 4, 4, 12];
        if groups.len() != lengths.len()
            || groups.iter().zip(lengths).any(|(g, len)| g.len() != len)
        {
            return Err(Error::InvalidGuid(s.to_string()));
        }

        let hex: String = groups.concat();
        let value = u128::from_str_radix(&hex, 16).map_err(|_| Error::InvalidGuid(s.to_string()))?;
        Ok(Self::from_u128(value))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d4 = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d4[0], d4[1], d4[2], d4[3], d4[4], d4[5], d4[6], d4[7]
        )
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Guid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Guid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Convert a link setting to the `int` the kernel takes.
pub(crate) fn link_int(what: &'static str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::InvalidArgument { what, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AdapterConfig::new("tun0");
        assert_eq!(config.device_path, PathBuf::from("/dev/net/tun"));
        assert_eq!(config.ring_capacity, DEFAULT_RING_CAPACITY);
        assert!(config.nonblocking);
        assert!(!config.multi_queue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ring_capacity() {
        let config = AdapterConfig::new("tun0").ring_capacity(RING_CAPACITY_MIN - 1);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidRingCapacity { capacity }) if capacity == RING_CAPACITY_MIN - 1
        ));

        let config = AdapterConfig::new("tun0").ring_capacity(RING_CAPACITY_MAX);
        assert!(config.validate().is_ok());

        // Any in-range value is left to the driver.
        let config = AdapterConfig::new("tun0").ring_capacity(200_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_link_settings() {
        assert!(AdapterConfig::new("tun0").mtu(1500).tx_queue_len(1000).validate().is_ok());

        let config = AdapterConfig::new("tun0").mtu(u32::MAX);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument { what: "mtu", value: u32::MAX })
        ));

        let config = AdapterConfig::new("tun0").tx_queue_len(1 << 31);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument { what: "txqueuelen", .. })
        ));
    }

    #[test]
    fn test_validate_name_and_mask() {
        let long = "x".repeat(ADAPTER_NAME_MAX);
        assert!(matches!(
            AdapterConfig::new(long).validate(),
            Err(Error::NameTooLong { .. })
        ));

        let config = AdapterConfig::new("tun0").netmask(Ipv4Addr::new(255, 0, 255, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_guid_parse_and_display() {
        let text = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";
        let guid: Guid = text.parse().unwrap();
        assert_eq!(guid.data1, 0x6ba7b810);
        assert_eq!(guid.data2, 0x9dad);
        assert_eq!(guid.data3, 0x11d1);
        assert_eq!(guid.data4, [0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8]);
        assert_eq!(guid.to_string(), text);

        let braced: Guid = format!("{{{}}}", text).parse().unwrap();
        assert_eq!(braced, guid);
        assert_eq!(Guid::from_u128(guid.as_u128()), guid);

        assert!("6ba7b810-9dad-11d1-80b4".parse::<Guid>().is_err());
        assert!("zba7b810-9dad-11d1-80b4-00c04fd430c8".parse::<Guid>().is_err());
    }

    #[test]
    fn test_guid_layout() {
        assert_eq!(std::mem::size_of::<Guid>(), 16);
        let guid = Guid::from_u128(0x00112233_4455_6677_8899_aabbccddeeff);
        // data1..data3 are native-endian fields, data4 is a byte array.
        assert_eq!(&guid.as_bytes()[8..], &[0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_from_json() {
        let config = AdapterConfig::from_json(
            r#"{
                "name": "niceland",
                "ipv4_address": "10.4.3.2",
                "netmask": "255.255.255.0",
                "mtu": 1420,
                "guid": "6ba7b810-9dad-11d1-80b4-00c04fd430c8"
            }"#,
        )
        .unwrap();
        assert_eq!(config.name, "niceland");
        assert_eq!(config.ipv4_address, Some(Ipv4Addr::new(10, 4, 3, 2)));
        assert_eq!(config.mtu, Some(1420));
        assert_eq!(config.device_path, PathBuf::from(TUN_DEVICE_PATH));
        assert!(config.guid.is_some());

        assert!(AdapterConfig::from_json(r#"{"ring_capacity": 1}"#).is_err());
    }
}
