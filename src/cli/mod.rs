// CLI module - User-facing command-line interface

mod output;

use crate::config::LaunchConfig;
use crate::error::{PoolError, Result};
use crate::logging;
use crate::process::ProcessSupervisor;
use crate::signals::SignalBridge;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Poolkeeper - keeps a pool of identical worker processes alive
#[derive(Parser)]
#[command(name = "poolkeeper")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker pool and supervise it until SIGINT/SIGTERM
    Start {
        /// Directory holding launch.toml or launch.json
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Number of workers (overrides pool.workers)
        #[arg(short = 'n', long)]
        workers: Option<usize>,
    },

    /// Write a default launch.toml
    Init {
        /// Directory to write launch.toml into
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Overwrite an existing launch.toml
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration and print what `start` would run
    Check {
        /// Directory holding launch.toml or launch.json
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },
}

impl Cli {
    /// Run the CLI application
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute().await
    }

    /// Execute the parsed command
    async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Start { workspace, workers } => start(workspace, *workers).await,
            Commands::Init { workspace, force } => init(workspace, *force),
            Commands::Check { workspace } => check(workspace),
        }
    }
}

async fn start(workspace: &Path, workers: Option<usize>) -> Result<()> {
    let (mut config, path, created) = LaunchConfig::load_or_init(workspace)?;
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }

    logging::init(config.log_config()?.with_env_overrides());

    if created {
        output::print_info(&format!(
            "No configuration found, wrote defaults to {}",
            path.display()
        ));
    }

    let (pool, spec) = config.resolve()?;
    let mut supervisor = ProcessSupervisor::new(pool, spec)?;
    let _signals = SignalBridge::install(supervisor.shutdown_handle())?;

    supervisor.start_pool().await?;
    output::print_pool_table(supervisor.spec(), supervisor.workers());
    output::print_info("Supervising workers, press Ctrl-C to stop");

    supervisor.monitor_loop().await;

    let report = supervisor.stop_all().await?;
    output::print_shutdown_report(&report);

    Ok(())
}

fn init(workspace: &Path, force: bool) -> Result<()> {
    let path = LaunchConfig::write_template(workspace, force)?;
    output::print_success(&format!("Wrote {}", path.display()));
    Ok(())
}

fn check(workspace: &Path) -> Result<()> {
    let path = LaunchConfig::locate(workspace).ok_or_else(|| {
        PoolError::ConfigError(format!(
            "No launch.toml or launch.json in {} (run `poolkeeper init`)",
            workspace.display()
        ))
    })?;

    let config = LaunchConfig::from_file(&path)?;
    let (pool, spec) = config.resolve()?;

    output::print_config(&path, &pool, &spec, &config.log);
    output::print_success("Configuration is valid");

    Ok(())
}
