//! conveyord — the Conveyor daemon.
//!
//! Assembles the control plane pieces for one run:
//! - Configuration (`conveyor.toml`)
//! - Sweeping output store (memory or redb)
//! - Remote task gateway with the swap-route handler
//! - Chain runner for the blue/green swap step
//!
//! # Usage
//!
//! ```text
//! conveyord swap-route --fixture cloud.json --setup setup.json --downsize --timeout 10m
//! conveyord scaffold-config > conveyor.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use conveyor_core::{ConveyorConfig, LoggingConfig};
use conveyor_lb::InMemoryCloud;
use conveyor_swap::SwapRouteParams;
use conveyord::swap_route;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conveyord", about = "Conveyor daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a blue/green swap route against a fixture-described fleet.
    SwapRoute {
        /// Cloud fixture (load balancers, listeners, rules, target groups, groups).
        #[arg(long)]
        fixture: PathBuf,

        /// Stage setup outcome to swap.
        #[arg(long)]
        setup: PathBuf,

        /// Configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Downsize the retiring group to zero after the swap.
        #[arg(long)]
        downsize: bool,

        /// Steady-state wait bound, e.g. "10m".
        #[arg(long)]
        timeout: Option<String>,
    },

    /// Print the default conveyor.toml.
    ScaffoldConfig,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info,conveyor=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::SwapRoute {
            fixture,
            setup,
            config,
            downsize,
            timeout,
        } => {
            let config = match config {
                Some(path) => ConveyorConfig::from_file(&path)?,
                None => ConveyorConfig::default(),
            };
            init_tracing(&config.logging);
            info!("Conveyor daemon starting in swap-route mode");

            let cloud = Arc::new(InMemoryCloud::new(swap_route::load_fixture(&fixture)?));
            let setup = swap_route::load_setup(&setup)?;
            let store = swap_route::open_store(&config.state)?;
            let params = SwapRouteParams {
                downsize_old_group: downsize,
                timeout,
            };

            let scope = swap_route::execution_scope(&swap_route::next_execution_id());
            let response = swap_route::run(&config, cloud, store, scope, &setup, &params).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(if response.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::ScaffoldConfig => {
            print!("{}", ConveyorConfig::scaffold().to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
