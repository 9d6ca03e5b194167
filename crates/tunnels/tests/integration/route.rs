//! Route integration tests.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tunnels::lab::RecordingRunner;
use tunnels::route::{Route, RouteSyntax, RouteTable};
use tunnels::tuntap::TunDevice;
use tunnels::{AdapterConfig, Interface, Result};

use crate::common::{ip, ip_link_delete, unique_ifname};

#[test]
fn test_add_route_is_idempotent() -> Result<()> {
    let runner = Arc::new(RecordingRunner::new().fail_when("ip route delete"));
    let table = RouteTable::with_runner(runner.clone(), RouteSyntax::Iproute2);
    let route = Route::new("172.30.0.0/16", "10.4.3.1".parse().unwrap())?;

    table.add_route(&route)?;
    table.add_route(&route)?;
    assert_eq!(runner.invocations().len(), 4);
    assert!(table.del_route(&route).is_err());
    Ok(())
}

#[test]
fn test_routes_through_tun_device() -> Result<()> {
    require_root!();

    let name = unique_ifname("tr");
    let config = AdapterConfig::new(&name)
        .ipv4_address(Ipv4Addr::new(10, 215, 0, 1))
        .netmask(Ipv4Addr::new(255, 255, 255, 0));
    let mut tun = TunDevice::create(config)?;
    let result = (|| -> Result<()> {
        tun.configure()?;

        let table = RouteTable::new();
        let route = Route::new("172.31.215.0/24", "10.215.0.2".parse().unwrap())?.metric(7);
        table.add_route(&route)?;
        table.add_route(&route)?;

        let routes = ip(&["route", "show", "172.31.215.0/24"]);
        assert!(routes.contains("via 10.215.0.2"), "route missing: {routes}");
        assert!(routes.contains("metric 7"), "metric missing: {routes}");

        table.del_route(&route)?;
        assert!(ip(&["route", "show", "172.31.215.0/24"]).trim().is_empty());
        Ok(())
    })();

    if tun.delete().is_err() {
        ip_link_delete(&name);
    }
    result
}

#[test]
fn test_default_gateway_parses() -> Result<()> {
    // Any host: either there is a default route or there is not, but the
    // table itself must parse.
    let _ = tunnels::route::default_gateway()?;
    Ok(())
}
