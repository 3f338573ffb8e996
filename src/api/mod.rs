//! HTTP API: scrape trigger and snapshot queries

pub mod health;
pub mod scrape;
pub mod tours;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{analyzer::AnalyzerImpl, config::AppConfig, orchestrator::ScrapeOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<ScrapeOrchestrator>,
    pub analyzer: Arc<AnalyzerImpl>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/scrape", post(scrape::trigger_scrape))
        .route("/tours", get(tours::list_tours))
        .route("/calendar/:tour_id", get(tours::calendar))
        .route("/schedules/:tour_id", get(tours::schedules))
        .route("/logs/:tour_id", get(tours::scrape_logs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
