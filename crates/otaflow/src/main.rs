//! otaflow CLI - over-the-air update coordinator
//!
//! Entry point for the `otaflow` command-line interface.

mod cli;
mod commands;
mod output;
mod version;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};
use commands::GlobalOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let global = GlobalOptions {
        device_version: cli.device_version,
        state_file: cli.state_file,
    };

    match cli.command {
        Commands::Check(args) => commands::check::run(args.install, &global).await,
        Commands::Install => commands::check::run(true, &global).await,
        Commands::Status(args) => commands::status::run(args, &global),
        Commands::Cleanup(args) => commands::cleanup::run(args, &global),
        Commands::Reset(args) => commands::reset::run(args, &global),
        Commands::Configs(args) => commands::configs::run(args, &global),
        Commands::Version(args) => commands::version::run(args),
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
