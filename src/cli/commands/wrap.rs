//! `wrap`: run a stdio MCP server behind the interception proxy.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::domain::models::Config;
use crate::services::{StdioProxy, TelemetryTags};

#[derive(Args, Debug)]
pub struct WrapArgs {
    /// Session id stamped on telemetry; a fresh one is generated when absent
    #[arg(long)]
    pub session_id: Option<String>,

    /// Provider key stamped on telemetry
    #[arg(long)]
    pub name: Option<String>,

    /// Telemetry ingress of a running gateway
    #[arg(long)]
    pub telemetry_url: Option<String>,

    /// Append telemetry records to this JSONL file
    #[arg(long)]
    pub telemetry_file: Option<PathBuf>,

    /// Server command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Run the proxy and return the exit code to mirror.
pub async fn execute(args: WrapArgs, mut config: Config) -> Result<i32> {
    if let Some(url) = args.telemetry_url {
        config.stdio.telemetry_url = Some(url);
    }
    if let Some(path) = args.telemetry_file {
        config.stdio.telemetry_file = Some(path);
    }

    let mut command = args.command.into_iter();
    let program = command.next().context("No command to wrap")?;
    let tags = TelemetryTags {
        session_id: Some(args.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())),
        upstream_key: args.name,
    };
    tracing::info!(
        command = %program,
        session_id = tags.session_id.as_deref().unwrap_or_default(),
        "wrapping stdio server"
    );

    let proxy = StdioProxy::new(program, command.collect())
        .with_config(&config.stdio)
        .context("Failed to configure telemetry sinks")?
        .with_tags(tags);

    proxy.run().await.context("Stdio proxy failed")
}
