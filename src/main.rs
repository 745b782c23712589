//! mcp-ledger CLI entry point.

use clap::Parser;

use mcp_ledger::cli::{handle_error, Cli, Commands};
use mcp_ledger::infrastructure::config::ConfigLoader;
use mcp_ledger::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load_with_override(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err),
    };

    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err),
    };

    let result = match cli.command {
        Commands::Serve(args) => mcp_ledger::cli::commands::serve::execute(args, config).await.map(|()| 0),
        Commands::Wrap(args) => mcp_ledger::cli::commands::wrap::execute(args, config).await,
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => handle_error(err),
    }
}
