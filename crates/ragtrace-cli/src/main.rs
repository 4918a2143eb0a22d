mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use ragtrace_core::Settings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr: stdout carries the MCP protocol and chat output.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    let settings = Settings::load()?;
    tracing::debug!("Loaded settings: {settings:?}");

    match cli.command {
        Commands::Chat(args) => commands::chat::run(&settings, args).await,
        Commands::McpServer => commands::mcp_server::run(&settings).await,
        Commands::Ingest(args) => commands::ingest::run(&settings, args).await,
        Commands::Eval(args) => commands::eval::run(&settings, args).await,
    }
}
