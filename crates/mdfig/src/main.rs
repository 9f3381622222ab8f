//! mdfig CLI - Mermaid diagrams for markdown sites.
//!
//! Provides commands for:
//! - `build`: Render diagrams and write the rewritten site
//! - `cache list`: Show cached images
//! - `cache prune`: Remove old cached images
//! - `cache clear`: Remove the cache directory

mod commands;
mod error;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{BuildArgs, CacheCommand};
use output::Output;

/// mdfig - Mermaid diagrams for markdown sites.
#[derive(Parser)]
#[command(name = "mdfig", version, about)]
struct Cli {
    /// Enable verbose output (per-page diagram logs).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render diagrams and write the site.
    Build(BuildArgs),
    /// Image cache maintenance.
    #[command(subcommand)]
    Cache(CacheCommand),
}

/// Install the tracing subscriber.
///
/// `--verbose` forces INFO level, otherwise `RUST_LOG` is used, then the
/// configured `log_level`.
pub(crate) fn init_tracing(verbose: bool, log_level: &str) {
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };
    // A second init (e.g. in tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    let result = match cli.command {
        Commands::Build(args) => args.execute(cli.verbose),
        Commands::Cache(cmd) => cmd.execute(cli.verbose),
    };

    if let Err(err) = result {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}
