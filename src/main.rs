//! clipwire - clipboard sync between two paired devices
//!
//! This is the main entry point for the clipwire binary.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipwire::cli::{Cli, CliHandler};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut handler = CliHandler::new(cli.config.clone());

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        handler.preferred_log_level()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clipwire={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("clipwire v{}", clipwire::VERSION);

    handler.handle_command(cli.command).await?;

    Ok(())
}
