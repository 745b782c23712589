//! `serve`: run the HTTP gateway until Ctrl-C or SIGTERM.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::application::{shutdown_signal, GatewayDaemon};
use crate::domain::models::{Config, GatewayMode};
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Gateway mode
    #[arg(long, value_parser = ["hub", "legacy"])]
    pub mode: Option<String>,

    /// Single upstream for legacy mode
    #[arg(long)]
    pub upstream_url: Option<String>,

    /// Provider registry file for hub mode
    #[arg(long)]
    pub registry: Option<PathBuf>,

    /// SQLite database path
    #[arg(long)]
    pub db: Option<String>,

    /// Record into this session instead of a fresh one
    #[arg(long)]
    pub session_id: Option<String>,

    /// Forward without recording
    #[arg(long)]
    pub no_record: bool,
}

impl ServeArgs {
    /// Layer command-line flags over the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.gateway.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.gateway.port = port;
        }
        match self.mode.as_deref() {
            Some("legacy") => config.gateway.mode = GatewayMode::Legacy,
            Some("hub") => config.gateway.mode = GatewayMode::Hub,
            _ => {}
        }
        if let Some(url) = &self.upstream_url {
            config.gateway.upstream_url = Some(url.clone());
        }
        if let Some(registry) = &self.registry {
            config.gateway.registry_path.clone_from(registry);
        }
        if let Some(db) = &self.db {
            config.database.path.clone_from(db);
        }
        if self.no_record {
            config.recording.enabled = false;
        }
    }
}

pub async fn execute(args: ServeArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);
    ConfigLoader::validate(&config)?;

    let daemon = GatewayDaemon::start(config, args.session_id).await?;
    daemon.run(shutdown_signal()).await
}
