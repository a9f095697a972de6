//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "binary"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Binary entrypoint for the device service daemon."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use ds_api::{spawn_api_server, ApiState};
use ds_common::{init_tracing, AppConfig, VersionInfo};
use ds_core::{DeviceServiceBuilder, SimulatedDriver};
use tokio::signal;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "configs/device-service.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("dsd ", env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_CARGO_TARGET_TRIPLE"), ")"),
    about = "Device service daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override service.listen")]
    listen: Option<SocketAddr>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the device service")]
    Run,
    #[command(about = "Validate the configuration and print the effective values")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::for_service(env!("CARGO_PKG_VERSION"));
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(listen) = cli.listen {
        config.service.listen = listen;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing(&config.service.name, &config.logging)?;
            info!(config_path = %loaded.source.display(), version = %version.cli_string(), "configuration loaded");
            run_service(config, version).await
        }
        Commands::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            println!("# source: {}\n{rendered}", loaded.source.display());
            Ok(())
        }
    }
}

async fn run_service(config: AppConfig, version: VersionInfo) -> Result<()> {
    let listen = config.service.listen;
    let driver = Arc::new(SimulatedDriver::new());
    let service = DeviceServiceBuilder::new(config, driver).start().await?;

    let state = Arc::new(ApiState::from_service(&service, version));
    let server = match spawn_api_server(state, listen) {
        Ok(server) => server,
        Err(err) => {
            error!(address = %listen, error = %err, "failed to start api server");
            service.shutdown(true).await?;
            return Err(err);
        }
    };

    info!(address = %server.addr(), "device service running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    server.shutdown().await?;
    service.shutdown(false).await?;
    Ok(())
}
