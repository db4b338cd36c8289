//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Eddy - event-driven reconciliation controller
#[derive(Parser, Debug)]
#[command(name = "eddy")]
#[command(version)]
#[command(about = "Watches a collection of resources and reconciles every change")]
#[command(
    long_about = "Eddy keeps a local cache of resources in sync through list/watch, turns every change into a deduplicated work item, and runs a pool of workers that reconcile each item with rate-limited retries."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller against a directory of manifests
    Run(RunArgs),

    /// Validate a config file and print the effective settings
    CheckConfig {
        /// Config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Directory of *.yaml, *.yml, or *.json manifests to watch
    #[arg(short, long)]
    pub manifests: PathBuf,

    /// Config file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Simulated work per item, in milliseconds
    #[arg(long)]
    pub work_ms: Option<u64>,

    /// Failed attempts allowed per key before it is dead-lettered
    #[arg(long)]
    pub max_retries: Option<u32>,
}
