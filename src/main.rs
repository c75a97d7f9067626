// src/main.rs - Print job monitor entry point
use std::path::PathBuf;

use clap::Parser;
use printwatch::gateway::Gateways;
use printwatch::printer::PrinterStateMachine;
use printwatch::web::printer_channel::MonitorRequest;
use printwatch::{Config, config};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Print job monitor
#[derive(Parser, Debug)]
#[command(name = "printwatch", about = "Monitors a print job and feeds its telemetry to quality models.")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "printwatch.toml")]
    config: PathBuf,

    /// Address for the control API (overrides `web.bind`)
    #[arg(long)]
    bind: Option<String>,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

fn load(cli: &Cli) -> Result<Config, config::ConfigError> {
    if cli.config.exists() {
        config::load_config(&cli.config)
    } else {
        tracing::warn!("Configuration file {} not found, using defaults", cli.config.display());
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    tracing::info!("Starting printwatch {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", cli.config.display());

    let mut config = load(&cli).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", cli.config.display(), e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    if let Some(bind) = &cli.bind {
        config.web.bind = bind.clone();
    }

    tracing::info!("Gateway: {}", config.gateway.base_url);
    tracing::info!("Allowed jobs: {}", config.monitor.jobs.len());

    let gateways = Gateways::http(&config)?;
    let bind = config.web.bind.clone();
    let machine = PrinterStateMachine::new(config, gateways)?;

    // Web handlers talk to the state machine task over this channel.
    let (monitor_tx, monitor_rx) = mpsc::channel::<MonitorRequest>(16);
    let cancel = CancellationToken::new();
    let machine_task = tokio::spawn(machine.run(monitor_rx, cancel.clone()));

    let app = printwatch::web::api::create_router(monitor_tx);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Control API listening on http://{}", listener.local_addr()?);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    machine_task.await?;
    tracing::info!("printwatch stopped");
    Ok(())
}
