//! openli-collector — lawful-intercept collector core.
//!
//! Exporter pipeline, mediator registry, and protocol trackers for an
//! ETSI LI collector. Packet capture, the BER codec, and the
//! provisioner's TLS channel are external collaborators. Run
//! `openli-collector --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod run;

use cli::{Cli, Commands};
use config::CollectorConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    if matches!(cli.command, Commands::Init) {
        let example = CollectorConfig::default_example();
        print!("{}", serde_yaml::to_string(&example)?);
        return Ok(());
    }

    let config = CollectorConfig::load(&cli.config)?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::CheckConfig => {
            eprintln!("{} is valid", cli.config.display());
        }
        Commands::Run => {
            run::run(&config)?;
        }
    }

    Ok(())
}
