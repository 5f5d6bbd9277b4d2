//! Realm game server
//!
//! An authoritative tile-grid world served over WebSockets.

mod commands;
mod config;
mod content;
mod entities;
mod formulas;
mod grid;
mod map;
mod navigation;
mod network;
mod persistence;
mod world;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use crate::config::{Cli, Protocol, ServerConfig};
use crate::content::Content;
use crate::network::Server;
use crate::world::World;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    config.apply_cli(&cli);
    config.validate()?;

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    info!("Starting realm server...");
    info!("Tick rate: {} Hz", config.world.tick_rate);
    if config.net.protocol == Protocol::Secure {
        info!("Secure protocol advertised: expecting a TLS-terminating proxy in front of {}", config.listen_addr());
    }

    let content = Content::load(config.content.dir.as_deref().map(Path::new))?;
    let content = Arc::new(content);

    let persistence = if config.persistence.offline {
        warn!("Offline mode: any credentials are accepted and nothing is saved");
        None
    } else {
        match persistence::init(&config.persistence.database_url, &config.persistence.redis_url).await {
            Ok(handle) => {
                info!("Persistence layer initialized");
                Some(handle)
            }
            Err(e) => {
                error!("Failed to initialize persistence: {}", e);
                error!("Server will run offline (no login checks, no saves)");
                None
            }
        }
    };

    let world = World::new(config.world.clone(), content);
    let server = Server::new(config, world, persistence);
    server.run().await?;

    info!("Goodbye");
    Ok(())
}
