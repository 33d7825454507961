//! # Test Database Provisioner
//!
//! Command-line entry point for test orchestrators. Run `controller` once before starting
//! workers, then `worker --worker-id <id>` in each worker, or `solo` for single-process runs.
//! Prints the alias -> physical database map as JSON on success.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use testdb_coordinator::logging::init_structured_logging;
use testdb_coordinator::{
    ConfigManager, ConnectionRegistry, DatabaseEngine, ExecutionMode, LifecycleCoordinator,
    MemoryEngine, MigrationSource, PostgresEngine, ProvisioningFlags,
};
use tracing::error;

#[derive(Parser)]
#[command(name = "testdb-provision")]
#[command(about = "Provision template and per-worker test databases")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Reuse existing test databases instead of recreating them
    #[arg(long)]
    reuse_db: bool,

    /// Recreate test databases even when --reuse-db is given
    #[arg(long)]
    create_db: bool,

    /// Build empty schemas without running migrations
    #[arg(long)]
    nomigrations: bool,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Exact verbosity level; 0 silences schema output
    #[arg(long, value_name = "LEVEL", conflicts_with = "verbose")]
    verbosity: Option<u8>,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment section to apply (default: TESTDB_ENV, APP_ENV, or test)
    #[arg(short, long)]
    environment: Option<String>,

    /// Run against an in-memory engine instead of the configured servers. A dry-run worker
    /// builds its own templates first.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Single-process run: build templates and use them directly
    Solo,

    /// Distributed run: build templates before workers start
    Controller,

    /// Distributed run: clone templates for one worker
    Worker {
        /// Worker id such as `3` or `gw3`
        #[arg(long, env = "TESTDB_WORKER_ID")]
        worker_id: String,
    },
}

impl Cli {
    fn execution_mode(&self) -> testdb_coordinator::Result<ExecutionMode> {
        match &self.command {
            Commands::Solo => ExecutionMode::from_signals(false, None),
            Commands::Controller => ExecutionMode::from_signals(true, None),
            Commands::Worker { worker_id } => ExecutionMode::from_signals(true, Some(worker_id.as_str())),
        }
    }

    /// Command-line options override configured defaults
    fn flags(&self, defaults: ProvisioningFlags) -> ProvisioningFlags {
        let mut flags = defaults;
        if self.reuse_db {
            flags.keep_existing = true;
        }
        if self.create_db {
            flags.force_create = true;
        }
        if self.nomigrations {
            flags.migrations_enabled = false;
        }
        if let Some(level) = self.verbosity {
            flags.verbosity = level;
        } else if self.verbose > 0 {
            flags.verbosity = self.verbose;
        }
        flags
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_structured_logging();

    match run(cli).await {
        Ok(output) => println!("{output}"),
        Err(err) => {
            error!("Test database setup failed: {err:#}");
            eprintln!("{err:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    let manager = match &cli.environment {
        Some(environment) => {
            ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        }
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("loading provisioning configuration")?;

    let config = manager.config();
    let flags = cli.flags(ProvisioningFlags::from(&config.provisioning));
    let mode = cli.execution_mode()?;

    let mut migrations = MigrationSource::new(manager.migrations_directory());
    if let Some(modules) = &config.migrations.modules {
        migrations = migrations.with_modules(modules.clone());
    }

    let engine: Arc<dyn DatabaseEngine> = if cli.dry_run {
        Arc::new(MemoryEngine::new())
    } else {
        Arc::new(PostgresEngine::new())
    };

    let registry = ConnectionRegistry::from_config(config);

    // No controller process shares the in-memory server with a dry-run worker
    if cli.dry_run && matches!(mode, ExecutionMode::Worker(_)) {
        LifecycleCoordinator::new(Arc::clone(&engine), registry.clone(), migrations.clone())
            .setup_for_controller(&flags)
            .await
            .context("dry-run template setup")?;
    }

    let mut coordinator = LifecycleCoordinator::new(engine, registry, migrations);
    let outcome = coordinator
        .run(&mode, &flags)
        .await
        .with_context(|| format!("{} setup", mode.name()))?;

    Ok(serde_json::to_string_pretty(&outcome.physical_names())?)
}
