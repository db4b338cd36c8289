//! # Eddy - controller entry point
//!
//! ## Startup Sequence
//!
//! 1. **Config** - defaults, then the TOML file, then CLI flags
//! 2. **Manifests** - initial scan of the manifest directory
//! 3. **Controller** - informer, work queue, and worker pool
//! 4. **Watch** - rescan the directory on change
//!
//! ## Shutdown
//!
//! SIGTERM/SIGINT stop the controller: the queue drains, workers exit, and
//! the run summary is logged. A stop before the cache syncs exits non-zero.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use eddy::cli::{Cli, Commands, RunArgs};
use eddy::signal::install_signal_handlers;
use eddy::{AppConfig, LoggingReconciler, ManifestDirSource};
use eddy_controller::Controller;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::CheckConfig { config } => {
            let config = AppConfig::load(config.as_deref()).context("Failed to load config")?;
            println!("{}", config.to_toml().context("Failed to render config")?);
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())
        .context("Failed to load config")?
        .with_overrides(&args);
    config
        .controller
        .validate()
        .context("Invalid settings after applying command-line flags")?;

    let source = Arc::new(ManifestDirSource::new(&args.manifests));
    let report = source.scan().with_context(|| {
        format!(
            "Failed to read manifest directory {}",
            args.manifests.display()
        )
    })?;
    info!(
        dir = %args.manifests.display(),
        objects = report.applied,
        skipped = report.skipped,
        "Manifests loaded"
    );

    let action = Arc::new(LoggingReconciler::new(Duration::from_millis(config.work_ms)));
    let controller = Controller::new(source.clone(), action, config.controller.clone())
        .context("Failed to create controller")?;

    let stop = controller.stop_handle();
    let _signals = install_signal_handlers(stop.clone());
    let watch_task = source
        .clone()
        .watch_dir(stop.subscribe())
        .context("Failed to watch manifest directory")?;

    let outcome = controller.run(config.controller.workers).await;

    stop.stop();
    if let Err(e) = watch_task.await {
        warn!(error = %e, "Manifest watcher task failed");
    }

    let summary = outcome.context("Controller run failed")?;
    info!(
        workers = summary.workers,
        processed = summary.stats.processed,
        succeeded = summary.stats.succeeded,
        failed = summary.stats.failed,
        retries = summary.queue.retries,
        "Eddy stopped gracefully"
    );
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
