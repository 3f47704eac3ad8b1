//! bakery CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

/// bakery - disk image inventory for network-booted machines
#[derive(Parser, Debug)]
#[command(name = "bakery")]
#[command(about = "Disk image inventory for network-booted machines")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: cli::ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the inventory and serve the HTTP API.
    Serve(cli::serve::ServeCmd),

    /// Load the inventory and print it.
    #[command(alias = "ls")]
    List(cli::list::ListCmd),

    /// Rewrite the NFS export table from the boot-client registry.
    RegenExports(cli::exports::RegenExportsCmd),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to info
    init_logging();

    tracing::debug!(version = bakery::VERSION, "starting bakery");

    let result = cli.config.resolve().and_then(|config| match cli.command {
        Commands::Serve(cmd) => cmd.run(config),
        Commands::List(cmd) => cmd.run(&config),
        Commands::RegenExports(cmd) => cmd.run(&config),
    });

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bakery=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
