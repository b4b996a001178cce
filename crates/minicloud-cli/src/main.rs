//! Minicloud CLI - Command-line client for a Minicloud server
//!
//! Provides commands for:
//! - Synchronizing configured folders with the server
//! - Managing the list of synchronized folders
//! - Showing server information
//! - Computing content fingerprints of local files

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use minicloud_core::config::Config;

mod commands;
mod output;
mod session;

use commands::{
    checksum::ChecksumCommand, folders::FoldersCommand, info::InfoCommand, sync::SyncCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "minicloud", version, about = "Folder synchronization client for Minicloud")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Synchronize configured folders with the server
    Sync(SyncCommand),
    /// Manage synchronized folders
    #[command(subcommand)]
    Folders(FoldersCommand),
    /// Show server information
    Info(InfoCommand),
    /// Print the content fingerprint of a local file
    Checksum(ChecksumCommand),
}

/// Options shared by every command
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub format: OutputFormat,
    pub quiet: bool,
    pub config_path: PathBuf,
}

impl GlobalOptions {
    pub fn formatter(&self) -> output::Printer {
        output::Printer::new(self.format, self.quiet)
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

/// Level used when `RUST_LOG` is unset
fn log_level(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let configured = Config::load_or_default(&config_path).logging.level;

    // Setup tracing
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(cli.verbose, &configured)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let options = GlobalOptions {
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        quiet: cli.quiet,
        config_path,
    };

    match cli.command {
        Commands::Sync(cmd) => cmd.execute(&options).await,
        Commands::Folders(cmd) => cmd.execute(&options).await,
        Commands::Info(cmd) => cmd.execute(&options).await,
        Commands::Checksum(cmd) => cmd.execute(&options).await,
    }
}
