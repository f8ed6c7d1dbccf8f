use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

mod backend;
mod config;
mod session;
mod store;
mod util;
mod web;

use crate::backend::backend_from_config;
use crate::config::{AppConfig, CliArgs};
use crate::store::client::MemoryClientStore;
use crate::store::duck_store::DuckStore;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Ensure data directory exists
    let data_dir = PathBuf::from(&config.data_dir);
    if !data_dir.exists() {
        info!("Creating data directory: {}", config.data_dir);
        std::fs::create_dir_all(&data_dir)?;
    }

    let database_path = config.database_path();
    info!("Opening store at {}", database_path);
    let store = Arc::new(DuckStore::open(
        &database_path,
        config.database.pool_size as u32,
    )?);

    info!("Using NL-to-SQL backend at {}", config.backend.api_url);
    let backend = backend_from_config(&config.backend)?;

    let app_state = Arc::new(AppState::new(
        config.clone(),
        backend,
        store.clone(),
        store.clone(),
        store,
        Arc::new(MemoryClientStore::new()),
    ));

    // Start the web server
    info!("Starting AuraSQL server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
