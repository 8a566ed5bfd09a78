//! # freemial-broker
//!
//! Broker binary: loads settings, sets up logging and metrics, and serves
//! the hub until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use freemial_server::config::ServerConfig;
use freemial_server::server::BrokerServer;
use freemial_settings::ServerSettings;

/// Freemial `WebSocket` relay broker.
#[derive(Parser, Debug)]
#[command(name = "freemial-broker", about = "Freemial WebSocket relay broker")]
struct Cli {
    /// Listen address as `host:port`. Overrides `--host` and `--port`.
    #[arg(long, value_parser = parse_addr, conflicts_with_all = ["host", "port"])]
    addr: Option<(String, u16)>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.freemial/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(freemial_settings::settings_path)
    }

    /// Apply listen overrides on top of loaded settings.
    fn apply(&self, server: &mut ServerSettings) {
        if let Some((host, port)) = &self.addr {
            server.host.clone_from(host);
            server.port = *port;
            return;
        }
        if let Some(host) = &self.host {
            server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            server.port = port;
        }
    }
}

fn parse_addr(val: &str) -> Result<(String, u16), String> {
    let (host, port) = val
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got '{val}'"))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port '{port}': {e}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok((host.to_owned(), port))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.settings_path();
    let mut settings = freemial_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings.server);

    freemial_logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = freemial_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from_settings(&settings);
    tracing::debug!(?config, "resolved server config");
    let server = BrokerServer::new(config).with_metrics(metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Freemial broker listening on ws://{addr}/");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let open = server
        .shutdown()
        .graceful_shutdown(handle, server.registry(), None)
        .await;
    tracing::info!(open_sessions = open, "Shutdown complete");
    Ok(())
}
