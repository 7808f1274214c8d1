//! # iris
//!
//! Iris hub binary: loads settings, starts logging, and runs the WebSocket
//! hub until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use iris_server::ServerConfig;
use iris_settings::{resolve_path, IrisSettings};
use iris_telemetry::{init_telemetry, TelemetryConfig};

/// Iris WebSocket hub between operator clients and the telephony gateway.
#[derive(Parser, Debug)]
#[command(name = "iris", about = "Iris WebSocket hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.iris/settings.json`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// External forms/methods API endpoint (overrides settings).
    #[arg(long)]
    api_url: Option<String>,

    /// Log filter directive, e.g. `debug` or `info,iris_server=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut IrisSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.api_url {
            settings.api.url = Some(url.clone());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn load_settings(cli: &Cli) -> Result<IrisSettings> {
    let path = cli.config.clone().unwrap_or_else(iris_settings::settings_path);
    let mut settings = iris_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    Ok(settings)
}

fn telemetry_config(settings: &IrisSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: settings.logging.level.clone(),
        json: settings.logging.json,
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: resolve_path(&settings.logging.db_path),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let telemetry = init_telemetry(telemetry_config(&settings));
    if let Some(path) = telemetry.journal_path() {
        tracing::info!(path = %path.display(), "warnings journaled to SQLite");
    }

    tracing::info!(
        host = %settings.server.host,
        port = settings.server.port,
        "Starting Iris hub"
    );

    let handle = iris_server::start(ServerConfig::from(&settings))
        .await
        .context("Failed to start server")?;

    tracing::info!(port = handle.port, "Iris hub ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
