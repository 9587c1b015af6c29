// Copyright (c) 2026 DeedFlow Contributors. MIT License.
// See LICENSE for details.

//! # DeedFlow CLI
//!
//! Entry point for the `deedflow` binary. Parses CLI arguments, initializes
//! logging, and dispatches to a subcommand:
//!
//! - `deploy`   — derive a coordinator address and write the deployment record
//! - `simulate` — run a complete sale and print the transcript as JSON
//! - `version`  — print build version information

mod cli;
mod deploy;
mod logging;
mod simulate;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Commands, DeedflowCli};
use deploy::{DeploymentConfig, DeploymentRecord};
use logging::LogFormat;

fn main() -> Result<()> {
    let cli = DeedflowCli::parse();
    let log_format = LogFormat::from_str_lossy(&cli.log_format);

    match cli.command {
        Commands::Deploy(args) => {
            logging::init_logging(logging::DEFAULT_FILTER, log_format);
            run_deploy(args)
        }
        Commands::Simulate(args) => {
            logging::init_logging(logging::DEFAULT_FILTER, log_format);
            run_simulation(args)
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Derives the coordinator for a config and writes its deployment record.
fn run_deploy(args: cli::DeployArgs) -> Result<()> {
    let config = DeploymentConfig::load(&args.config)?;
    tracing::info!(
        network = %config.network,
        chain_id = config.chain_id,
        registry = %config.registry,
        "deploying escrow coordinator"
    );

    let record = DeploymentRecord::from_config(&config);
    record.write(&args.out)?;

    tracing::info!(
        coordinator = %record.coordinator,
        deployment_id = %record.deployment_id,
        out = %args.out.display(),
        "deployment record written"
    );

    println!("Escrow coordinator deployed.");
    println!("  Network      : {} ({})", record.network, record.chain_id);
    println!("  Coordinator  : {}", record.coordinator);
    println!("  Deed registry: {}", record.registry);
    println!("  Record       : {}", args.out.display());

    Ok(())
}

/// Runs the reference sale and prints its transcript.
fn run_simulation(args: cli::SimulateArgs) -> Result<()> {
    let config = DeploymentConfig::load(&args.config)?;
    let report = simulate::run(&config, &args.buyer, args.price, &args.token_uri)
        .context("simulated sale failed")?;

    let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
    println!("{json}");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("deedflow {}", env!("CARGO_PKG_VERSION"));
    println!(
        "escrow   {} bp earnest",
        deedflow_contracts::config::ESCROW_BPS
    );
    println!("rustc    {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
