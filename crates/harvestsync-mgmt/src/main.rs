#![warn(missing_docs)]

//! `hsync`: publish and serve ResourceSync documents for a repository.

use anyhow::Result;
use clap::Parser;
use harvestsync_mgmt::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("harvestsync starting...");

    Cli::parse().run().await
}
