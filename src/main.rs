//! # Search Console Tap CLI (`gsc-tap`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gsc-tap init` | Create the SQLite checkpoint database |
//! | `gsc-tap check` | Verify access to every configured site |
//! | `gsc-tap discover` | Print the catalog as JSON |
//! | `gsc-tap sync` | Extract selected streams as Singer messages on stdout |
//!
//! Logs go to stderr; stdout carries only catalog or Singer output.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use search_console_tap::catalog::Catalog;
use search_console_tap::checkpoint::{self, TAP_NAME};
use search_console_tap::client::GoogleClient;
use search_console_tap::models::{SyncSettings, SystemClock};
use search_console_tap::sink::{CheckpointSink, SingerSink, Sink};
use search_console_tap::state::State;
use search_console_tap::sync::{run_sync, SyncContext};
use search_console_tap::{check, config, db, logging, migrate};

/// Google Search Console tap: incremental extraction of sites, sitemaps
/// and search-performance reports.
#[derive(Parser)]
#[command(name = "gsc-tap", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gsc.toml")]
    config: PathBuf,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the checkpoint database. Requires a `[state]` section.
    ///
    /// Idempotent.
    Init,

    /// Verify access to every configured site.
    Check,

    /// Check site access, then print the catalog JSON.
    Discover,

    /// Extract the selected streams.
    ///
    /// State comes from `--state` if given, otherwise from the checkpoint
    /// database when `[state]` is configured.
    Sync {
        /// Catalog file; defaults to every stream selected.
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// State file to resume from.
        #[arg(long)]
        state: Option<PathBuf>,

        /// Ignore any prior state and extract from the start date.
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let path = db::db_path(&cfg)
                .context("`init` needs a [state] section with db_path")?;
            migrate::run_migrations(path).await?;
            println!("Database initialized successfully.");
        }
        Commands::Check => {
            check::check_sites(&cfg).await?;
        }
        Commands::Discover => {
            let client = GoogleClient::from_config(&cfg)?;
            client.check_sites_access(&cfg.sync.sites()).await?;
            let catalog = Catalog::discover();
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
        Commands::Sync {
            catalog,
            state,
            full,
        } => {
            run_sync_command(&cfg, catalog, state, full).await?;
        }
    }

    Ok(())
}

async fn run_sync_command(
    cfg: &config::Config,
    catalog: Option<PathBuf>,
    state_file: Option<PathBuf>,
    full: bool,
) -> Result<()> {
    let settings = SyncSettings::from_config(cfg)?;
    let catalog = match catalog {
        Some(path) => Catalog::load(&path)?,
        None => Catalog::discover().select_all(),
    };

    let pool = match db::db_path(cfg) {
        Some(path) => {
            let pool = db::connect(path).await?;
            migrate::apply(&pool).await?;
            Some(pool)
        }
        None => None,
    };

    let state = if full {
        if let Some(pool) = &pool {
            checkpoint::clear_state(pool, TAP_NAME).await?;
        }
        State::new()
    } else if let Some(path) = &state_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        State::parse(&text)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?
    } else if let Some(pool) = &pool {
        checkpoint::load_state(pool, TAP_NAME).await?.unwrap_or_default()
    } else {
        State::new()
    };

    let client = GoogleClient::from_config(cfg)?;
    let mut sink: Box<dyn Sink> = match pool.clone() {
        Some(pool) => Box::new(CheckpointSink::new(SingerSink::stdout(), pool, TAP_NAME)),
        None => Box::new(SingerSink::stdout()),
    };

    let clock = SystemClock;
    let mut ctx = SyncContext {
        transport: &client,
        sink: sink.as_mut(),
        clock: &clock,
        settings: &settings,
    };
    let (_, summary) = run_sync(&mut ctx, &catalog, state).await?;
    tracing::info!(
        streams = summary.streams,
        records = summary.records,
        pages = summary.pages,
        skipped_sites = summary.skipped_sites,
        "sync complete"
    );

    if let Some(pool) = pool {
        pool.close().await;
    }
    Ok(())
}
