//! tunctl command - create, configure and drive tunnel adapters.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tunctl", version, about = "Tunnel adapter tool")]
struct Cli {
    /// Native driver library for packet-ring adapters.
    #[arg(long, global = true, default_value = "wintun.dll")]
    driver: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create and configure an adapter.
    #[command(visible_alias = "add")]
    Create(commands::adapter::CreateCmd),

    /// Delete an adapter.
    #[command(visible_alias = "del")]
    Delete(commands::adapter::DeleteCmd),

    /// Manage routes and DNS servers.
    #[command(visible_alias = "r")]
    Route(commands::route::RouteCmd),

    /// Re-send frames received on an interface to the destination in their
    /// headers.
    #[cfg(target_os = "linux")]
    Reflect(commands::reflect::ReflectCmd),

    /// Show the running packet-ring driver version.
    DriverVersion,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Create(cmd) => cmd.run(&cli.driver),
        Command::Delete(cmd) => cmd.run(&cli.driver),
        Command::Route(cmd) => cmd.run(),
        #[cfg(target_os = "linux")]
        Command::Reflect(cmd) => cmd.run(),
        Command::DriverVersion => commands::adapter::driver_version(&cli.driver),
    }
}
