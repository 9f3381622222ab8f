//! `mdfig cache` subcommand group.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use clap::{Args, Subcommand};
use mdfig_cache::{CacheEntry, FileImageCache, ImageStore, read_entries};
use mdfig_config::Config;
use serde::Serialize;

use crate::error::CliError;
use crate::output::Output;

const SECS_PER_DAY: u64 = 86_400;

/// Cache commands.
#[derive(Subcommand)]
pub(crate) enum CacheCommand {
    /// List cached images.
    List(ListArgs),
    /// Remove cached images older than a given age.
    Prune(PruneArgs),
    /// Remove the cache directory.
    Clear(ConfigArgs),
}

/// Arguments shared by all cache commands.
#[derive(Args)]
pub(crate) struct ConfigArgs {
    /// Path to configuration file (default: auto-discover mdfig.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Arguments for `cache list`.
#[derive(Args)]
pub(crate) struct ListArgs {
    #[command(flatten)]
    common: ConfigArgs,

    /// Print entries as JSON.
    #[arg(long)]
    json: bool,
}

/// Arguments for `cache prune`.
#[derive(Args)]
pub(crate) struct PruneArgs {
    #[command(flatten)]
    common: ConfigArgs,

    /// Remove entries older than this many days.
    #[arg(long, default_value_t = 30)]
    max_age_days: u64,
}

impl ConfigArgs {
    fn load(&self, verbose: bool) -> Result<Config, CliError> {
        let config = Config::load(self.config.as_deref(), None)?;
        crate::init_tracing(verbose, &config.diagrams_resolved.log_level);
        Ok(config)
    }
}

impl CacheCommand {
    /// Execute the cache subcommand.
    pub(crate) fn execute(self, verbose: bool) -> Result<(), CliError> {
        let output = Output::new();
        match self {
            Self::List(args) => {
                let config = args.common.load(verbose)?;
                let entries = read_entries(&config.cache_resolved.dir)?;
                let now = SystemTime::now();
                if args.json {
                    let records: Vec<EntryRecord<'_>> =
                        entries.iter().map(|e| EntryRecord::new(e, now)).collect();
                    output.data(&serde_json::to_string_pretty(&records)?);
                } else {
                    for entry in &entries {
                        output.data(&format!(
                            "{}  {:>6}  {}",
                            entry.fingerprint,
                            format_age(age(entry, now)),
                            entry.image_path.display()
                        ));
                    }
                    output.info(&format!(
                        "{} cached images in {}",
                        entries.len(),
                        config.cache_resolved.dir.display()
                    ));
                }
            }
            Self::Prune(args) => {
                let config = args.common.load(verbose)?;
                let dir = &config.cache_resolved.dir;
                if !dir.exists() {
                    output.info("Cache is empty");
                    return Ok(());
                }
                let cache = FileImageCache::open(dir.clone())?;
                let max_age = Duration::from_secs(args.max_age_days.saturating_mul(SECS_PER_DAY));
                let removed = prune(&cache, max_age, SystemTime::now())?;
                output.success(&format!(
                    "Removed {removed} images older than {} days",
                    args.max_age_days
                ));
            }
            Self::Clear(args) => {
                let config = args.load(verbose)?;
                let dir = &config.cache_resolved.dir;
                if clear(dir)? {
                    output.success(&format!("Removed {}", dir.display()));
                } else {
                    output.info("Cache is empty");
                }
            }
        }
        Ok(())
    }
}

/// Cache entry as printed by `cache list --json`.
#[derive(Debug, Serialize)]
struct EntryRecord<'a> {
    fingerprint: &'a str,
    path: &'a Path,
    size_bytes: u64,
    age_secs: u64,
}

impl<'a> EntryRecord<'a> {
    fn new(entry: &'a CacheEntry, now: SystemTime) -> Self {
        Self {
            fingerprint: &entry.fingerprint,
            path: &entry.image_path,
            size_bytes: fs::metadata(&entry.image_path).map_or(0, |m| m.len()),
            age_secs: age(entry, now).as_secs(),
        }
    }
}

/// Remove entries older than `max_age` as of `now`. Returns files removed.
fn prune(store: &dyn ImageStore, max_age: Duration, now: SystemTime) -> io::Result<usize> {
    let mut removed = 0;
    for entry in store.entries()? {
        if age(&entry, now) > max_age {
            tracing::debug!(fingerprint = %entry.fingerprint, "pruning cache entry");
            removed += store.remove(&entry.fingerprint)?;
        }
    }
    Ok(removed)
}

/// Remove the cache directory. Returns whether there was anything to remove.
fn clear(dir: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn age(entry: &CacheEntry, now: SystemTime) -> Duration {
    now.duration_since(entry.created_at).unwrap_or_default()
}

/// Compact age like `42s`, `5m`, `3h` or `12d`.
fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m", secs / 60),
        3600..SECS_PER_DAY => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / SECS_PER_DAY),
    }
}
