//! Read-only tour endpoints: catalog, calendar, current schedules and scrape history

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::AppState;
use crate::{
    analyzer::{Analyzer, PriceSummary},
    config::TourConfig,
    error::{AppError, AppResult},
    model::{CalendarDay, JobKey, Schedule, ScrapeLog, SnapshotState, Tour},
    utils::{date_window, parse_date},
};

const DEFAULT_CALENDAR_DAYS: u32 = 30;
const MAX_CALENDAR_DAYS: u32 = 366;
const DEFAULT_LOG_LIMIT: usize = 20;
const MAX_LOG_LIMIT: usize = 200;

fn known_tour<'a>(state: &'a AppState, tour_id: &str) -> AppResult<&'a TourConfig> {
    state
        .config
        .tour(tour_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown tour {}", tour_id)))
}

fn date_param(value: &str) -> AppResult<NaiveDate> {
    parse_date(value)
        .ok_or_else(|| AppError::BadRequest(format!("invalid date {:?}, expected YYYY-MM-DD", value)))
}

pub async fn list_tours(State(state): State<AppState>) -> AppResult<Json<Vec<Tour>>> {
    let tours = state.orchestrator.store().lock().await.list_tours()?;
    Ok(Json(tours))
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub from: Option<String>,
    pub days: Option<u32>,
}

/// One entry per date in the window; dates never committed report `has_data: false`.
pub async fn calendar(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    Query(query): Query<CalendarQuery>,
) -> AppResult<Json<Vec<CalendarDay>>> {
    known_tour(&state, &tour_id)?;
    let from = match query.from.as_deref() {
        Some(value) => date_param(value)?,
        None => Utc::now().date_naive(),
    };
    let days = query.days.unwrap_or(DEFAULT_CALENDAR_DAYS);
    if days == 0 || days > MAX_CALENDAR_DAYS {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_CALENDAR_DAYS
        )));
    }
    let to = from + Duration::days(i64::from(days) - 1);

    let stored = state.orchestrator.store().lock().await.calendar(&tour_id, from, to)?;
    let mut by_date: HashMap<NaiveDate, CalendarDay> =
        stored.into_iter().map(|day| (day.date, day)).collect();

    let window = date_window(from, days)
        .into_iter()
        .map(|date| {
            by_date.remove(&date).unwrap_or(CalendarDay {
                date,
                has_data: false,
                rows: 0,
            })
        })
        .collect();

    Ok(Json(window))
}

#[derive(Debug, Deserialize)]
pub struct SchedulesQuery {
    pub date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    NeverScraped,
    Committed,
}

#[derive(Debug, Serialize)]
pub struct SchedulesResponse {
    pub tour_id: String,
    pub date: NaiveDate,
    pub status: SnapshotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraped_at: Option<DateTime<Utc>>,
    pub rows: Vec<Schedule>,
    pub summary: Option<PriceSummary>,
}

pub async fn schedules(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    Query(query): Query<SchedulesQuery>,
) -> AppResult<Json<SchedulesResponse>> {
    known_tour(&state, &tour_id)?;
    let date = date_param(&query.date)?;

    let current = state
        .orchestrator
        .store()
        .lock()
        .await
        .current_snapshot(&JobKey::new(&tour_id, date))?;

    let response = match current {
        SnapshotState::NeverScraped => SchedulesResponse {
            tour_id,
            date,
            status: SnapshotStatus::NeverScraped,
            snapshot_id: None,
            scraped_at: None,
            rows: Vec::new(),
            summary: None,
        },
        SnapshotState::Committed(snapshot) => SchedulesResponse {
            tour_id,
            date,
            status: SnapshotStatus::Committed,
            snapshot_id: Some(snapshot.id),
            scraped_at: Some(snapshot.created_at),
            summary: state.analyzer.summarize(&snapshot.rows),
            rows: snapshot.rows,
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

pub async fn scrape_logs(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<Vec<ScrapeLog>>> {
    known_tour(&state, &tour_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let logs = state.orchestrator.store().lock().await.scrape_logs(&tour_id, limit)?;
    Ok(Json(logs))
}
