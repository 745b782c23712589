//! CLI type definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::serve::ServeArgs;
use super::commands::wrap::WrapArgs;

#[derive(Parser, Debug)]
#[command(name = "mcp-ledger")]
#[command(about = "Transparent recording gateway for MCP tool servers", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file, replacing .mcp-ledger/config.yaml and local.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP gateway daemon
    Serve(ServeArgs),

    /// Wrap a stdio MCP server and capture its traffic
    Wrap(WrapArgs),
}
