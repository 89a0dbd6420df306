//! Academy cache CLI
//!
//! Usage:
//!   academy-cache get      - Print the cached record
//!   academy-cache put      - Replace the cached record
//!   academy-cache expire   - Clear the cache file
//!   academy-cache status   - Report empty / populated / corrupt
//!   academy-cache daemon   - Run scheduled expiry and key rotation
//!
//! Configuration comes from the environment (or a `.env` file), see
//! `academy_cache::config`. Rotation only runs inside `daemon`: a rotated
//! key is random and lives in process memory, so a one-shot rotate would
//! leave the file unreadable after exit.

use std::path::PathBuf;
use std::sync::Arc;

use academy_cache::{CacheConfig, CacheRead, CacheStore, Scheduler};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "academy-cache")]
#[command(author = "Academy Team")]
#[command(version)]
#[command(about = "Encrypted local cache for the Academy dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cached record as JSON ({} when empty or unreadable)
    Get {
        /// Cache file (defaults to ACADEMY_CACHE_PATH)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Encrypt and store a JSON record
    Put {
        /// The record, as JSON text
        json: String,

        /// Cache file (defaults to ACADEMY_CACHE_PATH)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Truncate the cache file
    Expire,

    /// Report whether the cache is empty, populated, or corrupt
    Status {
        /// Cache file (defaults to ACADEMY_CACHE_PATH)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Run scheduled expiry and key rotation until Ctrl-C
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = CacheConfig::from_env().context("Failed to load cache configuration")?;
    let store = CacheStore::from_config(&config).context("Failed to initialize cache key")?;
    let target = |path: Option<PathBuf>| path.unwrap_or_else(|| config.cache_path.clone());

    match cli.command {
        Commands::Get { path } => {
            let record = store.read_or_empty(target(path));
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Put { json, path } => {
            let record: serde_json::Value =
                serde_json::from_str(&json).context("Record is not valid JSON")?;
            let path = target(path);
            store
                .write(&record, &path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Stored record in {}", path.display());
        }

        Commands::Expire => {
            let at = store.expire_cache()?;
            println!("Cache expired at {}", at.to_rfc3339());
        }

        Commands::Status { path } => {
            let status = match store.read(target(path)) {
                CacheRead::Empty => "empty".to_string(),
                CacheRead::Hit(_) => "populated".to_string(),
                CacheRead::Corrupt(e) => format!("corrupt ({})", e),
            };
            println!("{}", status);
        }

        Commands::Daemon => {
            let store = Arc::new(store);
            info!(
                path = %store.cache_path().display(),
                expiry_secs = config.expiry_interval.as_secs(),
                rotation_secs = config.rotation_interval.as_secs(),
                "cache maintenance started"
            );
            let handle = Scheduler::spawn(
                store.clone(),
                config.expiry_interval,
                config.rotation_interval,
            );

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;

            handle.shutdown().await;
            info!(generation = store.key_generation(), "cache maintenance stopped");
        }
    }

    Ok(())
}
