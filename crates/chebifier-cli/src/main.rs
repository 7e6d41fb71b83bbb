use std::path::{Path, PathBuf};

use anyhow::Context;
use chebifier_cache::config_file::{self, CacheSection, ConfigFile};
use chebifier_cache::{CacheConfig, PredictionCache, read_snapshot};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

/// Chebifier prediction cache - inspect and maintain cache snapshots
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CacheArgs {
    /// Path to the cache snapshot (.json, or .db/.sqlite/.sqlite3 for SQLite)
    #[arg(long = "cache", value_name = "PATH")]
    path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show entry counts per model
    Stats {
        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Print cached entries, least recently used first
    List {
        #[command(flatten)]
        cache: CacheArgs,

        /// Only show entries of this model
        #[arg(long)]
        model: Option<String>,
    },

    /// Print the cached prediction of one model for one SMILES string
    Get {
        smiles: String,
        model: String,

        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Drop every entry and delete the snapshot
    Clear {
        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Store cache settings in the platform config file
    Config {
        /// Snapshot location to remember
        #[arg(long = "cache", value_name = "PATH")]
        persist_path: Option<PathBuf>,

        /// Maximum number of cached entries
        #[arg(long)]
        max_size: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let color = ColorMode(!cli.no_color);

    match cli.command {
        Command::Stats { cache } => stats(load_config(cache.path)?, color),
        Command::List { cache, model } => list(load_config(cache.path)?, model.as_deref(), color),
        Command::Get {
            smiles,
            model,
            cache,
        } => get(load_config(cache.path)?, &smiles, &model),
        Command::Clear { cache } => clear(load_config(cache.path)?, color),
        Command::Config {
            persist_path,
            max_size,
        } => write_config(persist_path, max_size, color),
    }
}

/// Resolve configuration from the environment and config files.
fn load_config(cache_path: Option<PathBuf>) -> anyhow::Result<CacheConfig> {
    resolve_config(
        cache_path,
        std::env::var("CHEBIFIER_CACHE_PATH").ok(),
        std::env::var("CHEBIFIER_CACHE_SIZE").ok(),
        &config_file::load_config(),
    )
}

// Resolve configuration: CLI flags > env vars > config file > defaults
fn resolve_config(
    cache_path: Option<PathBuf>,
    env_path: Option<String>,
    env_size: Option<String>,
    file: &ConfigFile,
) -> anyhow::Result<CacheConfig> {
    let mut config = CacheConfig::from_file(file);
    if let Some(size) = env_size {
        config.max_size = size
            .trim()
            .parse()
            .with_context(|| format!("CHEBIFIER_CACHE_SIZE is not a valid size: {size:?}"))?;
    }
    config.persist_path = cache_path
        .or_else(|| env_path.map(PathBuf::from))
        .or(config.persist_path);
    if config.persist_path.is_none() {
        anyhow::bail!(
            "No cache snapshot configured. Pass --cache PATH, set CHEBIFIER_CACHE_PATH, or set cache.persist_path in {}",
            config_file::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".chebifier.toml".to_string())
        );
    }
    tracing::debug!(
        path = ?config.persist_path,
        max_size = config.max_size,
        "resolved cache configuration"
    );
    Ok(config)
}

fn snapshot_path(config: &CacheConfig) -> anyhow::Result<&Path> {
    config
        .persist_path
        .as_deref()
        .context("No cache snapshot configured")
}

fn read_entries(path: &Path) -> anyhow::Result<Vec<chebifier_cache::SnapshotEntry<Value>>> {
    let entries = read_snapshot::<Value>(path)
        .with_context(|| format!("Failed to read cache snapshot {}", path.display()))?;
    Ok(entries.unwrap_or_default())
}

fn stats(config: CacheConfig, color: ColorMode) -> anyhow::Result<()> {
    let path = snapshot_path(&config)?;
    let entries = read_entries(path)?;
    let mut out = std::io::stdout().lock();
    output::print_stats(&mut out, path, &entries, config.max_size, color)?;
    Ok(())
}

fn list(config: CacheConfig, model: Option<&str>, color: ColorMode) -> anyhow::Result<()> {
    let path = snapshot_path(&config)?;
    let entries = read_entries(path)?;
    let mut out = std::io::stdout().lock();
    output::print_entries(&mut out, &entries, model, color)?;
    Ok(())
}

fn get(config: CacheConfig, smiles: &str, model: &str) -> anyhow::Result<()> {
    let cache = PredictionCache::<Value>::from_config(&config)?;
    // A stored `null` is a "no prediction" that should never have been cached.
    match cache.get(smiles, model).filter(|v| !v.is_null()) {
        Some(value) => {
            let mut out = std::io::stdout().lock();
            output::print_value(&mut out, &value)?;
            Ok(())
        }
        None => anyhow::bail!("No cached prediction of {} for {}", model, smiles),
    }
}

fn clear(config: CacheConfig, color: ColorMode) -> anyhow::Result<()> {
    let path = snapshot_path(&config)?;
    // An unreadable snapshot is still cleared; it just counts as empty.
    let on_disk = read_snapshot::<Value>(path)
        .ok()
        .flatten()
        .map_or(0, |entries| entries.len());
    let cache = PredictionCache::<Value>::open(on_disk.max(config.max_size), path)?;
    cache.clear();
    let mut out = std::io::stdout().lock();
    output::print_cleared(&mut out, path, on_disk, color)?;
    Ok(())
}

fn write_config(
    persist_path: Option<PathBuf>,
    max_size: Option<usize>,
    color: ColorMode,
) -> anyhow::Result<()> {
    let persist_path = persist_path
        .map(|p| std::path::absolute(&p).with_context(|| format!("Invalid path {}", p.display())))
        .transpose()?;
    let existing = config_file::config_path()
        .and_then(|p| config_file::load_from_path(&p))
        .unwrap_or_default();
    let updated = update_config(existing, persist_path, max_size)?;
    let path = config_file::save_config(&updated).context("Failed to save config")?;
    let mut out = std::io::stdout().lock();
    output::print_config_saved(&mut out, &path, &updated, color)?;
    Ok(())
}

/// Overlay the given settings on an existing config file.
fn update_config(
    existing: ConfigFile,
    persist_path: Option<PathBuf>,
    max_size: Option<usize>,
) -> anyhow::Result<ConfigFile> {
    if persist_path.is_none() && max_size.is_none() {
        anyhow::bail!("Nothing to store. Pass --cache PATH and/or --max-size N");
    }
    if max_size == Some(0) {
        anyhow::bail!("--max-size must be at least 1");
    }
    let overlay = ConfigFile {
        cache: Some(CacheSection {
            max_size,
            persist_path: persist_path.map(|p| p.to_string_lossy().into_owned()),
        }),
    };
    Ok(config_file::merge(existing, overlay))
}
