//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the EMS daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use ems_bus::ChannelBus;
use ems_common::{init_tracing, AppConfig, FromConfig, LogFormat};
use ems_core::{EmsContext, EnergyManager, ManagerConfig};
use ems_metrics::{new_registry, spawn_http_server, DaemonMetrics};
use tokio::runtime::Handle;
use tokio::signal;
use tracing::info;

mod loader;

use loader::LoadedComponents;

#[derive(Debug, Parser)]
#[command(author, version, about = "EMS daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Start with every component held in maintenance")]
    maintenance: bool,

    #[arg(long, value_name = "FORMAT", help = "Override log format (structured-json or pretty)")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/emsd.toml"));
    candidates.push(PathBuf::from("/etc/ems/emsd.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded_config.config;
    let load_duration = load_started.elapsed();

    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if cli.maintenance {
        config.manager.set("maintenance", true);
    }
    init_tracing("emsd", &config.logging)?;
    info!(config_path = %loaded_config.source.display(), "configuration loaded");

    let metrics_registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(metrics_registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let bus = Arc::new(ChannelBus::new());
    bus.declare_all(&config.channels);
    let context = EmsContext::new(bus).with_metrics(metrics_registry)?;

    let components = LoadedComponents::activate(&config, &context, Handle::current())?;
    daemon_metrics.set_components_activated(components.len());
    info!(components = components.len(), channels = config.channels.len(), "components activated");

    let manager_config =
        ManagerConfig::from_record(&config.manager).context("invalid [manager] section")?;
    let manager = EnergyManager::start(&context, manager_config)?;

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    manager.shutdown()?;
    components.shutdown(&context).await;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}
