//! Archivist CLI - drop-folder archive repackager.
//!
//! Archivist opens archives (probing common passwords), re-encodes the images
//! inside, repackages everything into a new archive and optionally uploads it
//! together with an article record.
//!
//! # Usage
//!
//! ```bash
//! # Process two archives and a folder, in that order
//! archivist set-a.7z set-b.zip ./loose-photos/
//!
//! # Watch a drop folder
//! archivist --watch ~/Drop --poll-interval 10
//!
//! # Inspect or create the configuration
//! archivist --print-config
//! archivist --init-config
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use archivist_core::Config;
use clap::Parser;

mod cli;
mod logging;

/// Archivist - extract, recompress, repackage and upload archives.
#[derive(Parser, Debug)]
#[command(name = "archivist")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Archives or folders to process, in the given order
    inputs: Vec<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, value_name = "FILE", env = "ARCHIVIST_CONFIG")]
    config: Option<PathBuf>,

    /// Poll a drop folder and process new archives and folders as they settle
    #[arg(short, long, value_name = "DIR")]
    watch: Option<PathBuf>,

    /// Seconds between drop-folder polls
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    poll_interval: u64,

    /// Skip the Uploading stage regardless of `api.enabled`
    #[arg(long)]
    no_upload: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json_logs: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,

    /// Overwrite an existing config file with --init-config
    #[arg(long, requires = "init_config")]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if cli.init_config {
        return cli::config::init(&config_path, cli.force);
    }

    let mut config = load_config(&config_path, cli.config.is_some())?;
    if cli.print_config {
        return cli::config::print(&config);
    }
    if cli.no_upload {
        config.api.enabled = false;
    }

    logging::init_from_config(&config, cli.verbose, cli.json_logs);
    tracing::debug!("Archivist v{}", archivist_core::VERSION);

    if cli.inputs.is_empty() && cli.watch.is_none() {
        anyhow::bail!("Nothing to do: pass archives or folders, or --watch <DIR>");
    }

    let watch = cli.watch.map(|dir| cli::watch::WatchOptions {
        dir,
        interval: Duration::from_secs(cli.poll_interval.max(1)),
    });
    cli::run::execute(config, cli.inputs, watch).await
}

/// Load the config file.
///
/// A missing default file means defaults; a missing explicit file, or any
/// file that cannot be read, parsed or validated, is a startup failure.
fn load_config(path: &std::path::Path, explicit: bool) -> anyhow::Result<Config> {
    if !path.exists() {
        if explicit {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return Ok(Config::default());
    }
    Config::load_from(path).with_context(|| format!("Failed to load config {}", path.display()))
}
