//! Manual scrape trigger

use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::{
    error::{AppError, AppResult},
    orchestrator::{CancelToken, JobReport},
    utils::parse_date,
};

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub tour_id: String,
    pub date: String,
}

/// Runs one scrape to a terminal state and returns its report.
///
/// The job runs on its own task. If the client goes away first, the drop guard cancels it,
/// which closes the browser session and leaves the stored snapshot untouched.
pub async fn trigger_scrape(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> AppResult<Json<JobReport>> {
    let tour = state
        .config
        .tour(&request.tour_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("unknown tour {}", request.tour_id)))?;
    let date = parse_date(&request.date)
        .ok_or_else(|| AppError::BadRequest(format!("invalid date {:?}, expected YYYY-MM-DD", request.date)))?;

    info!("Manual scrape requested for {} on {}", tour.id, date);

    let cancel = CancelToken::new();
    let on_disconnect = cancel.cancel_on_drop("client disconnected");
    let orchestrator = state.orchestrator.clone();
    let job = tokio::spawn(async move { orchestrator.trigger(&tour, date, cancel).await });

    let result = job
        .await
        .map_err(|e| AppError::Internal(format!("scrape task failed: {}", e)))?;
    on_disconnect.disarm();

    Ok(Json(result?))
}
