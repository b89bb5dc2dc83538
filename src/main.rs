use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kflashd::adapters::get_port_lister;
use kflashd::config::AppConfig;
use kflashd::context::AppContext;
use kflashd::core::{FlasherType, GithubReleases, ReleaseCache};
use kflashd::logging::{self, LogConfig};
use kflashd::web::WebServer;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "kflashd")]
#[command(about = "Local web flasher for K210 boards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use the simulated flasher and a fake serial port
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    simulation: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the web UI on 127.0.0.1
    Serve(ServerArgs),
    /// List serial ports
    Ports,
    /// List available release versions
    Releases,
}

#[derive(Args, Serialize)]
struct ServerArgs {
    #[serde(rename = "http_port", skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, value_enum)]
    flasher: Option<FlasherType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    kflash_bin: Option<PathBuf>,

    /// Do not open the UI in a browser
    #[serde(skip)]
    #[arg(long)]
    no_browser: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.command {
        Commands::Serve(args) => {
            let mut config = AppConfig::new(Some(args))?;
            if args.no_browser {
                config.open_browser = false;
            }
            config
        }
        _ => AppConfig::new(None::<&ServerArgs>)?,
    };
    if let Some(simulation) = cli.simulation {
        config.simulation = simulation;
    }

    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    match cli.command {
        Commands::Serve(_) => run_server(config).await.context("Web server failed")?,
        Commands::Ports => run_ports(&config).await.context("Failed to list serial ports")?,
        Commands::Releases => run_releases(&config)
            .await
            .context("Failed to list releases")?,
    }

    Ok(())
}

async fn run_server(config: AppConfig) -> Result<()> {
    let bind_addr = config.bind_addr();
    tracing::info!(
        cache_dir = %config.cache_dir.display(),
        simulation = config.simulation,
        flasher = ?config.flasher,
        "Starting kflashd"
    );
    let ctx = AppContext::new(config)?;
    WebServer::new(ctx, bind_addr).start().await
}

async fn run_ports(config: &AppConfig) -> Result<()> {
    let lister = get_port_lister(config.simulation);
    let ports = tokio::task::spawn_blocking(move || lister.list_ports()).await??;

    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}\t{}\t{}", port.device, port.description, port.hwid);
    }
    Ok(())
}

async fn run_releases(config: &AppConfig) -> Result<()> {
    let source = Arc::new(GithubReleases::new()?);
    let releases = ReleaseCache::new(config.cache_dir.clone(), source)
        .with_version_list(config.release_list_limit, config.release_list_ttl());

    for version in releases.list_available_versions().await {
        let status = releases.status(&version).await?;
        let state = if status.extracted {
            "extracted"
        } else if status.downloaded {
            "downloaded"
        } else {
            "remote"
        };
        println!("{version}\t{state}");
    }
    Ok(())
}
