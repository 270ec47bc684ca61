//! CLI definitions for the collector.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "openli-collector",
    version,
    about = "Lawful-intercept collector: exporter pipeline, mediator registry, protocol trackers",
    long_about = None
)]
pub struct Cli {
    /// Path to the collector's YAML config file
    #[clap(long, short, default_value = "openli-collector.yaml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the collector: exporter loop, mediator registry, protocol trackers
    Run,

    /// Parse and validate the config file, then exit
    CheckConfig,

    /// Print an example config to stdout
    Init,
}
