//! # Roomcast Server
//!
//! Real-time fan-out hub for chat rooms and direct messages.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! roomcast
//!
//! # Run with custom config
//! roomcast --config /path/to/roomcast.toml
//!
//! # Show the effective configuration and exit
//! roomcast --print-config
//!
//! # List every flag
//! roomcast --help
//!
//! # Override with environment variables
//! ROOMCAST_PORT=8080 ROOMCAST_HOST=0.0.0.0 roomcast
//! ```

mod config;
mod error;
mod handlers;
mod metrics;
mod store;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "roomcast",
    author,
    version,
    about = "Roomcast - real-time fan-out server for chat rooms and direct messages."
)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, short, env = "ROOMCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = config::Config::load(args.config.as_deref())?;

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    tracing::info!(
        "Starting Roomcast server on {}:{} ({} users, {} rooms)",
        config.host,
        config.port,
        config.directory.users.len(),
        config.directory.rooms.len()
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
