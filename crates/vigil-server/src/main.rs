//! vigil daemon binary

use anyhow::Context;
use std::path::PathBuf;
use vigil_server::{Config, VigilServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref()).context("failed to load configuration")?;

    match config.logging.format.as_str() {
        "json" => common::logging::init_json(&config.logging.level),
        _ => common::logging::init(&config.logging.level),
    }

    tracing::info!(listen_addr = %config.server.listen_addr, "Vigil starting");

    VigilServer::new(config).run().await?;
    Ok(())
}
