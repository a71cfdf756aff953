//! flotillad — the Flotilla daemon.
//!
//! Single binary that assembles the fleet balancer:
//! - State store (redb)
//! - Load aggregation (configured providers)
//! - Cooling manager
//! - Balancing engine loop
//!
//! # Usage
//!
//! ```text
//! flotillad seed fleet.toml --data-dir /var/lib/flotilla
//! flotillad run --data-dir /var/lib/flotilla --load-config load.toml
//! flotillad decisions --data-dir /var/lib/flotilla --limit 20
//! ```

mod seed;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use flotilla_balancer::{Engine, EngineConfig, StateAuditSink};
use flotilla_cooling::CoolingManager;
use flotilla_load::{LoadAggregator, ProviderConfig, ProviderRegistry};
use flotilla_state::StateStore;

#[derive(Parser)]
#[command(name = "flotillad", about = "Flotilla fleet balancing daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the balancing loop until interrupted.
    Run {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/flotilla")]
        data_dir: PathBuf,

        /// Balancing cycle interval in seconds.
        #[arg(long, default_value = "60")]
        interval: u64,

        /// Cooling period between same-direction scale actions, in seconds.
        #[arg(long, default_value = "300")]
        cooling_period: u64,

        /// Default tickets-per-unit ratio for processors without one.
        #[arg(long, default_value = "10")]
        tickets_per_unit: u32,

        /// Let pool-scoped processors draw from the general pool when
        /// their own pool runs dry.
        #[arg(long)]
        shared_overflow: bool,

        /// TOML file describing load providers and name aliases.
        #[arg(long)]
        load_config: Option<PathBuf>,
    },

    /// Apply a fleet seed file (processors, resources, fixed assignments).
    Seed {
        /// Seed file to apply.
        file: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/flotilla")]
        data_dir: PathBuf,
    },

    /// Print recent balancing decisions as JSON lines, oldest first.
    Decisions {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/flotilla")]
        data_dir: PathBuf,

        /// Maximum number of decisions to print.
        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

/// Load-side configuration: alias map plus provider entries.
#[derive(Debug, Default, Deserialize)]
struct LoadConfigFile {
    /// Upstream name → canonical processor name.
    #[serde(default)]
    aliases: HashMap<String, String>,
    #[serde(default)]
    provider: Vec<ProviderConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flotillad=debug,flotilla=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            data_dir,
            interval,
            cooling_period,
            tickets_per_unit,
            shared_overflow,
            load_config,
        } => {
            run_daemon(
                data_dir,
                interval,
                cooling_period,
                tickets_per_unit,
                shared_overflow,
                load_config,
            )
            .await
        }
        Command::Seed { file, data_dir } => run_seed(&file, &data_dir),
        Command::Decisions { data_dir, limit } => print_decisions(&data_dir, limit),
    }
}

async fn run_daemon(
    data_dir: PathBuf,
    interval: u64,
    cooling_period: u64,
    tickets_per_unit: u32,
    shared_overflow: bool,
    load_config: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("Flotilla daemon starting");

    let store = open_store(&data_dir)?;

    let aggregator = match load_config {
        Some(path) => build_aggregator(&path)?,
        None => {
            warn!("no load configuration given; all processors will report zero pending load");
            LoadAggregator::new()
        }
    };

    let cooling = Arc::new(CoolingManager::new(Duration::from_secs(cooling_period)));
    info!(cooling_period_secs = cooling_period, "cooling manager initialized");

    let audit = Arc::new(StateAuditSink::new(store.clone()));

    let config = EngineConfig {
        default_tickets_per_unit: tickets_per_unit,
        strict_pool_isolation: !shared_overflow,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = Engine::new(
        Arc::new(store),
        aggregator,
        cooling,
        audit,
        config,
        shutdown_rx,
    );

    let engine_handle = tokio::spawn(async move {
        engine.run(Duration::from_secs(interval)).await;
    });

    // Graceful shutdown on Ctrl-C.
    tokio::signal::ctrl_c()
        .await
        .context("installing CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = engine_handle.await;

    info!("Flotilla daemon stopped");
    Ok(())
}

fn run_seed(file: &Path, data_dir: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading seed file {}", file.display()))?;
    let seed_file: seed::SeedFile =
        toml::from_str(&raw).with_context(|| format!("parsing seed file {}", file.display()))?;

    let store = open_store(data_dir)?;
    let (processors, resources, assignments) = seed::apply(&store, &seed_file)?;
    info!(processors, resources, assignments, "seed applied");
    Ok(())
}

fn print_decisions(data_dir: &Path, limit: usize) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    for decision in store.list_decisions(limit)? {
        println!("{}", serde_json::to_string(&decision)?);
    }
    Ok(())
}

fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let db_path = data_dir.join("flotilla.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

fn build_aggregator(path: &Path) -> anyhow::Result<LoadAggregator> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading load configuration {}", path.display()))?;
    let config: LoadConfigFile =
        toml::from_str(&raw).with_context(|| format!("parsing load configuration {}", path.display()))?;

    let registry = ProviderRegistry::with_defaults();
    let mut aggregator = LoadAggregator::new().with_alias_map(config.aliases);
    for entry in &config.provider {
        aggregator.register(registry.build(entry)?);
    }
    info!(providers = aggregator.provider_count(), "load providers configured");
    Ok(aggregator)
}
