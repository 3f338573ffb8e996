mod analyzer;
mod api;
mod config;
mod error;
mod model;
mod normalizer;
mod orchestrator;
mod parser;
mod scheduler;
mod scraper;
mod storage;
mod utils;

use analyzer::AnalyzerImpl;
use api::{AppState, create_router};
use config::{AppConfig, load_config};
use orchestrator::ScrapeOrchestrator;
use scraper::ChromeLauncher;
use std::sync::Arc;
use storage::{SharedStore, SqliteStorage};
use tokio::sync::Mutex;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Log panics from background tasks before they vanish
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Panic occurred: {:?}", panic_info);
    }));

    let config: Arc<AppConfig> = match load_config("config.json") {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("Config load error: {}", e);
            return;
        }
    };
    info!("Loaded {} tours", config.tours.len());

    let mut storage = match SqliteStorage::new(&config.storage.path) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            return;
        }
    };
    let tours: Vec<_> = config.tours.iter().map(|t| t.tour()).collect();
    if let Err(e) = storage.sync_tours(&tours) {
        error!("Failed to sync tours: {}", e);
        return;
    }
    let store: SharedStore = Arc::new(Mutex::new(storage));

    let launcher = Arc::new(ChromeLauncher::new(config.browser.clone(), &config.timing));
    let orchestrator = Arc::new(ScrapeOrchestrator::new(launcher, store, &config));

    if config.scheduler.enabled {
        scheduler::spawn_sweep(orchestrator.clone(), config.clone());
    } else {
        info!("Periodic sweep disabled; scrapes run on request only");
    }

    let state = AppState {
        config: config.clone(),
        orchestrator,
        analyzer: Arc::new(AnalyzerImpl::new()),
    };

    let listener = match tokio::net::TcpListener::bind(&config.server.bind).await {
        Ok(l) => l,
        Err(e) => {
            error!("Cannot bind {}: {}", config.server.bind, e);
            return;
        }
    };
    info!("Listening on {}", config.server.bind);

    if let Err(e) = axum::serve(listener, create_router(state)).await {
        error!("Server error: {}", e);
    }
}
