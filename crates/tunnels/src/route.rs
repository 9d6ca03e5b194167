//! Static routes and DNS servers through the platform's command-line tools.
//!
//! # Example
//!
//! ```ignore
//! use tunnels::route::{Route, RouteTable};
//!
//! let table = RouteTable::new();
//! table.add_route(&Route::new("10.0.0.0/8", "10.4.3.1".parse()?)?.metric(10))?;
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use crate::command::{CommandRunner, Invocation, SystemRunner, run_checked};
use crate::error::{Error, Result};
use crate::util::{parse_prefix, prefix_to_netmask};

/// Which tool family to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSyntax {
    /// `ip route` and `resolvectl`.
    Iproute2,
    /// `route` and `netsh`.
    Windows,
}

impl RouteSyntax {
    /// The syntax of the platform we are running on.
    pub fn native() -> Self {
        if cfg!(windows) { Self::Windows } else { Self::Iproute2 }
    }
}

/// A static route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network address.
    pub destination: IpAddr,
    /// Destination prefix length.
    pub prefix_len: u8,
    /// Next hop.
    pub gateway: IpAddr,
    /// Route metric. Windows tools treat 0 as "unset" and use 1.
    pub metric: u32,
    /// Outgoing interface index (Windows only).
    pub interface_index: Option<u32>,
}

impl Route {
    /// Create a route to `destination` in CIDR notation.
    pub fn new(destination: &str, gateway: IpAddr) -> Result<Self> {
        let (destination, prefix_len) = parse_prefix(destination)?;
        if destination.is_ipv4() != gateway.is_ipv4() {
            return Err(Error::InvalidAddress(format!(
                "gateway {} does not match the family of {}",
                gateway, destination
            )));
        }
        Ok(Self {
            destination,
            prefix_len,
            gateway,
            metric: 0,
            interface_index: None,
        })
    }

    /// Set the metric.
    pub fn metric(mut self, metric: u32) -> Self {
        self.metric = metric;
        self
    }

    /// Set the outgoing interface index.
    pub fn interface_index(mut self, index: u32) -> Self {
        self.interface_index = Some(index);
        self
    }

    fn cidr(&self) -> String {
        format!("{}/{}", self.destination, self.prefix_len)
    }

    fn ipv4_destination(&self) -> Result<Ipv4Addr> {
        match self.destination {
            IpAddr::V4(v4) => Ok(v4),
            IpAddr::V6(_) => Err(Error::NotSupported("IPv6 routes with the route tool".into())),
        }
    }
}

/// Route and resolver management.
#[derive(Debug, Clone)]
pub struct RouteTable {
    runner: Arc<dyn CommandRunner>,
    syntax: RouteSyntax,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    /// Run the native tools for real.
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemRunner), RouteSyntax::native())
    }

    /// Use a custom runner and tool syntax.
    pub fn with_runner(runner: Arc<dyn CommandRunner>, syntax: RouteSyntax) -> Self {
        Self { runner, syntax }
    }

    /// Install a route, replacing any identical one.
    ///
    /// The route is deleted first and the delete's outcome ignored, so
    /// adding the same route twice succeeds.
    pub fn add_route(&self, route: &Route) -> Result<()> {
        if let Err(e) = self.del_route(route) {
            tracing::debug!("pre-delete of {} ignored: {}", route.cidr(), e);
        }
        run_checked(&*self.runner, &self.add_invocation(route)?)?;
        tracing::debug!(route = %route.cidr(), gateway = %route.gateway, "route added");
        Ok(())
    }

    /// Remove a route.
    pub fn del_route(&self, route: &Route) -> Result<()> {
        run_checked(&*self.runner, &self.del_invocation(route)?)?;
        Ok(())
    }

    /// Register a DNS server on an interface.
    ///
    /// `index` is the position in the server list (Windows only).
    pub fn add_dns_server(&self, interface: &str, server: IpAddr, index: u32) -> Result<()> {
        let invocation = match self.syntax {
            RouteSyntax::Windows => {
                let family = if server.is_ipv4() { "ipv4" } else { "ipv6" };
                Invocation::new("netsh").args([
                    "interface".to_string(),
                    family.to_string(),
                    "add".to_string(),
                    "dnsservers".to_string(),
                    format!("name={}", interface),
                    format!("address={}", server),
                    format!("index={}", index),
                ])
            }
            RouteSyntax::Iproute2 => Invocation::new("resolvectl")
                .arg("dns")
                .arg(interface)
                .arg(server.to_string()),
        };
        run_checked(&*self.runner, &invocation)?;
        Ok(())
    }

    fn add_invocation(&self, route: &Route) -> Result<Invocation> {
        Ok(match self.syntax {
            RouteSyntax::Iproute2 => Invocation::new("ip").args([
                "route".to_string(),
                "add".to_string(),
                route.cidr(),
                "via".to_string(),
                route.gateway.to_string(),
                "metric".to_string(),
                route.metric.to_string(),
            ]),
            RouteSyntax::Windows => {
                let mut inv = Invocation::new("route").args([
                    "add".to_string(),
                    route.ipv4_destination()?.to_string(),
                    "mask".to_string(),
                    prefix_to_netmask(route.prefix_len).to_string(),
                    route.gateway.to_string(),
                    "metric".to_string(),
                    route.metric.max(1).to_string(),
                ]);
                if let Some(index) = route.interface_index {
                    inv = inv.arg("if").arg(index.to_string());
                }
                inv
            }
        })
    }

    fn del_invocation(&self, route: &Route) -> Result<Invocation> {
        Ok(match self.syntax {
            RouteSyntax::Iproute2 => Invocation::new("ip").args([
                "route".to_string(),
                "delete".to_string(),
                route.cidr(),
                "via".to_string(),
                route.gateway.to_string(),
                "metric".to_string(),
                route.metric.to_string(),
            ]),
            RouteSyntax::Windows => Invocation::new("route").args([
                "delete".to_string(),
                route.ipv4_destination()?.to_string(),
                "mask".to_string(),
                prefix_to_netmask(route.prefix_len).to_string(),
                route.gateway.to_string(),
            ]),
        })
    }
}

const RTF_UP: u32 = 0x0001;
const RTF_GATEWAY: u32 = 0x0002;

/// The IPv4 default gateway from the kernel routing table.
#[cfg(target_os = "linux")]
pub fn default_gateway() -> Result<Option<Ipv4Addr>> {
    let table = std::fs::read_to_string("/proc/net/route")?;
    parse_proc_net_route(&table)
}

/// Find the default gateway in the text of `/proc/net/route`.
///
/// Addresses in that file are hex dumps of the in-memory (network order)
/// value printed as a host-order integer.
pub fn parse_proc_net_route(table: &str) -> Result<Option<Ipv4Addr>> {
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let parse = |field: &str| {
            u32::from_str_radix(field, 16)
                .map_err(|_| Error::InvalidAddress(format!("bad /proc/net/route field: {}", field)))
        };
        let destination = parse(fields[1])?;
        let gateway = parse(fields[2])?;
        let flags = parse(fields[3])?;

        if destination == 0 && flags & (RTF_UP | RTF_GATEWAY) == RTF_UP | RTF_GATEWAY {
            return Ok(Some(Ipv4Addr::from(gateway.to_ne_bytes())));
        }
    }
    Ok(None)
}

#[cfg(all(test, feature = "lab"))]
mod lab_tests {
    use super::*;
    use crate::lab::RecordingRunner;

    #[test]
    fn test_add_route_twice() {
        // No such route yet: every delete fails.
        let runner = Arc::new(RecordingRunner::new().fail_when("ip route delete"));
        let table = RouteTable::with_runner(runner.clone(), RouteSyntax::Iproute2);
        let route = Route::new("10.0.0.0/8", "10.4.3.1".parse().unwrap())
            .unwrap()
            .metric(5);

        table.add_route(&route).unwrap();
        table.add_route(&route).unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "ip route delete 10.0.0.0/8 via 10.4.3.1 metric 5",
                "ip route add 10.0.0.0/8 via 10.4.3.1 metric 5",
                "ip route delete 10.0.0.0/8 via 10.4.3.1 metric 5",
                "ip route add 10.0.0.0/8 via 10.4.3.1 metric 5",
            ]
        );
    }

    #[test]
    fn test_add_failure_is_reported() {
        let runner = Arc::new(RecordingRunner::new().fail_when("route add"));
        let table = RouteTable::with_runner(runner, RouteSyntax::Windows);
        let route = Route::new("10.0.0.0/8", "10.4.3.1".parse().unwrap()).unwrap();
        assert!(matches!(table.add_route(&route), Err(Error::Command { .. })));
    }

    #[test]
    fn test_windows_syntax() {
        let runner = Arc::new(RecordingRunner::new());
        let table = RouteTable::with_runner(runner.clone(), RouteSyntax::Windows);
        let route = Route::new("10.0.0.0/8", "10.4.3.1".parse().unwrap())
            .unwrap()
            .interface_index(17);
        table.add_route(&route).unwrap();
        table
            .add_dns_server("wg0", "1.1.1.1".parse().unwrap(), 1)
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "route delete 10.0.0.0 mask 255.0.0.0 10.4.3.1",
                "route add 10.0.0.0 mask 255.0.0.0 10.4.3.1 metric 1 if 17",
                "netsh interface ipv4 add dnsservers name=wg0 address=1.1.1.1 index=1",
            ]
        );

        let v6 = Route::new("fd00::/64", "fd00::1".parse().unwrap()).unwrap();
        assert!(table.add_route(&v6).unwrap_err().is_not_supported());
    }

    #[test]
    fn test_resolvectl() {
        let runner = Arc::new(RecordingRunner::new());
        let table = RouteTable::with_runner(runner.clone(), RouteSyntax::Iproute2);
        table
            .add_dns_server("tun0", "fd00::53".parse().unwrap(), 1)
            .unwrap();
        assert_eq!(runner.commands(), vec!["resolvectl dns tun0 fd00::53"]);
    }
}
