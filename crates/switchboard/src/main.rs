//! # switchboard
//!
//! Switchboard server binary: loads settings, builds the chat rooms
//! dispatcher, and serves it over WebSocket until Ctrl-C.

mod app;
mod auth;
mod chat;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_logging::LogFormat;
use switchboard_server::{ServerConfig, SwitchboardServer};
use switchboard_settings::SwitchboardSettings;
use tracing::{info, warn};

use crate::auth::AuthPlugin;

/// Switchboard WebSocket router.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Route JSON WebSocket messages to handlers")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.switchboard/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// JSON route table file (overrides settings).
    #[arg(long)]
    routes: Option<PathBuf>,

    /// Shared token required from every client.
    #[arg(long)]
    auth_token: Option<String>,

    /// Log filter directive, e.g. `debug` or `switchboard_runtime=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit newline-delimited JSON logs.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Command-line flags win over file and environment settings.
    fn apply(&self, settings: &mut SwitchboardSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(routes) = &self.routes {
            settings.routing.routes_path = Some(routes.display().to_string());
        }
        if let Some(token) = &self.auth_token {
            settings.auth.token = Some(token.clone());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => switchboard_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => switchboard_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);

    switchboard_logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = switchboard_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let dispatcher = app::build_dispatcher(&settings).context("Invalid route configuration")?;

    let config = ServerConfig::from(&settings.server);
    let mut server = SwitchboardServer::new(config, dispatcher).with_metrics(metrics);
    match &settings.auth.token {
        Some(token) => server.add_plugin(Arc::new(AuthPlugin::new(
            token.clone(),
            settings.auth.key_name.clone(),
        ))),
        None => warn!("no auth token configured, accepting all connections"),
    }

    let handle = server.listen().await.context("Failed to start server")?;
    info!(addr = %handle.local_addr(), "ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");
    handle.stop().await.context("Server shutdown failed")?;
    Ok(())
}
