//! tunctl route command implementation.

use std::net::IpAddr;

use anyhow::Result;
use clap::{Args, Subcommand};
use tunnels::route::{Route, RouteTable};

#[derive(Args)]
pub struct RouteCmd {
    #[command(subcommand)]
    action: RouteAction,
}

#[derive(Subcommand)]
enum RouteAction {
    /// Add a route, replacing an identical one.
    Add(RouteSpec),

    /// Delete a route.
    #[command(visible_alias = "delete")]
    Del(RouteSpec),

    /// Register a DNS server on an interface.
    Dns {
        /// Interface name.
        interface: String,

        /// Server address.
        server: IpAddr,

        /// Position in the server list (Windows).
        #[arg(long, default_value_t = 1)]
        index: u32,
    },

    /// Show the IPv4 default gateway.
    #[cfg(target_os = "linux")]
    DefaultGateway,
}

#[derive(Args)]
struct RouteSpec {
    /// Destination prefix (e.g., 10.0.0.0/8).
    destination: String,

    /// Gateway address.
    #[arg(long, short)]
    via: IpAddr,

    /// Route metric.
    #[arg(long, default_value_t = 0)]
    metric: u32,

    /// Outgoing interface index (Windows).
    #[arg(long)]
    ifindex: Option<u32>,
}

impl RouteSpec {
    fn route(&self) -> Result<Route> {
        let mut route = Route::new(&self.destination, self.via)?.metric(self.metric);
        if let Some(index) = self.ifindex {
            route = route.interface_index(index);
        }
        Ok(route)
    }
}

impl RouteCmd {
    pub fn run(&self) -> Result<()> {
        let table = RouteTable::new();

        match &self.action {
            RouteAction::Add(spec) => table.add_route(&spec.route()?)?,
            RouteAction::Del(spec) => table.del_route(&spec.route()?)?,
            RouteAction::Dns {
                interface,
                server,
                index,
            } => table.add_dns_server(interface, *server, *index)?,
            #[cfg(target_os = "linux")]
            RouteAction::DefaultGateway => match tunnels::route::default_gateway()? {
                Some(gateway) => println!("{}", gateway),
                None => println!("none"),
            },
        }

        Ok(())
    }
}
