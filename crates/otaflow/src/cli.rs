//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// otaflow - over-the-air update coordinator
#[derive(Parser, Debug)]
#[command(name = "otaflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Treat the device as running this software version
    #[arg(long, global = true, value_name = "VERSION")]
    pub device_version: Option<String>,

    /// Operation store file (overrides paths.state-file)
    #[arg(long, global = true, value_name = "PATH")]
    pub state_file: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check for a newer build
    Check(CheckArgs),

    /// Check for a newer build and install it
    Install,

    /// Show stored operations
    Status(StatusArgs),

    /// Remove finished operation records
    Cleanup(CleanupArgs),

    /// Clear all stored operation state
    Reset(ResetArgs),

    /// List downloaded update configs
    Configs(ConfigsArgs),

    /// Show version information
    Version(VersionArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Install the update as soon as it is found
    #[arg(long)]
    pub install: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Remove records older than this many minutes (default: store.stale-after-mins)
    #[arg(long, value_name = "MINUTES")]
    pub max_age_mins: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Clear state even while operations are recorded as active
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
