use crate::config::{AppConfig, TimingConfig, TourConfig};
use crate::model::{
    DriverError, JobKey, LogEntry, Schedule, ScrapeError, ScrapeOutcome, Tour,
};
use crate::normalizer::normalize_all;
use crate::orchestrator::cancel::CancelToken;
use crate::orchestrator::jobs::{JobGuard, JobState, JobTable};
use crate::parser::{PriceExtractor, SettlePolicy};
use crate::scraper::{BrowserLauncher, PageDriver, RowFailure, RowReading, ScheduleEnumerator};
use crate::storage::SharedStore;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{error, info, warn};

const DEADLINE_REASON: &str = "job deadline exceeded";

/// Terminal result of one scrape job, as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub tour_id: String,
    pub date: NaiveDate,
    pub state: JobState,
    pub outcome: ScrapeOutcome,
    pub rows_ok: usize,
    pub rows_failed: usize,
    pub snapshot_id: Option<i64>,
    pub log_id: i64,
    pub error: Option<String>,
}

struct Collected {
    rows: Vec<RowReading>,
    failures: Vec<RowFailure>,
}

enum RunError {
    /// Worth another attempt with a fresh session.
    Retryable(DriverError),
    Fatal(String),
    Cancelled(String),
}

pub struct ScrapeOrchestrator {
    launcher: Arc<dyn BrowserLauncher>,
    enumerator: ScheduleEnumerator,
    store: SharedStore,
    jobs: JobTable,
    sessions: Arc<Semaphore>,
    timing: TimingConfig,
}

impl ScrapeOrchestrator {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, store: SharedStore, config: &AppConfig) -> Self {
        let timing = config.timing.clone();
        let settle = SettlePolicy {
            timeout: timing.settle_timeout(),
            poll: timing.settle_poll(),
        };
        let extractor = PriceExtractor::new(config.price_selectors.clone(), settle, &config.default_currency);

        Self {
            launcher,
            enumerator: ScheduleEnumerator::new(extractor, timing.clone()),
            store,
            jobs: JobTable::new(),
            sessions: Arc::new(Semaphore::new(config.browser.max_sessions)),
            timing,
        }
    }

    #[cfg(test)]
    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Runs one scrape for `tour` on `date` and reconciles the result with the store.
    ///
    /// Row failures only lower the outcome. Navigation failures are retried and, once the
    /// attempts run out, end the job as `Failed` with the prior snapshot left current.
    /// `Err` is reserved for contention, cancellation and storage failures.
    pub async fn trigger(
        &self,
        tour: &TourConfig,
        date: NaiveDate,
        cancel: CancelToken,
    ) -> Result<JobReport, ScrapeError> {
        let key = JobKey::new(&tour.id, date);
        let mut guard = self.jobs.try_acquire(&key)?;
        let started_at = Utc::now();
        let deadline = Instant::now() + self.timing.job_timeout();

        advance(&mut guard, JobState::Running);
        info!("Scrape started for {}", key);

        let collected = match self.run(&tour.tour(), date, &cancel, deadline).await {
            Ok(collected) => collected,
            Err(RunError::Cancelled(reason)) => {
                warn!("Scrape for {} cancelled: {}", key, reason);
                advance(&mut guard, JobState::Failed);
                let log = log_entry(&key, started_at, ScrapeOutcome::Failed, 0, 0, Some(format!("cancelled: {}", reason)));
                if let Err(e) = self.store.lock().await.record_log(&log) {
                    error!("Cannot record cancellation of {}: {}", key, e);
                }
                return Err(ScrapeError::Cancelled(reason));
            }
            Err(RunError::Retryable(e)) => {
                let detail = match e {
                    DriverError::Navigation(message) => message,
                    other => other.to_string(),
                };
                let summary = ScrapeError::NavigationFailed(detail).to_string();
                return self.finish_failed(&mut guard, started_at, 0, 0, summary).await;
            }
            Err(RunError::Fatal(reason)) => {
                return self.finish_failed(&mut guard, started_at, 0, 0, reason).await;
            }
        };

        let rows_ok = collected.rows.len();
        let rows_failed = collected.failures.len();
        let summary = failure_summary(collected.failures);

        let state = match (rows_ok, rows_failed) {
            (_, 0) => JobState::Succeeded,
            (0, _) => JobState::Failed,
            _ => JobState::PartiallySucceeded,
        };
        if state == JobState::Failed {
            let summary = summary.unwrap_or_default();
            return self.finish_failed(&mut guard, started_at, 0, rows_failed, summary).await;
        }

        let outcome = state.outcome().unwrap_or(ScrapeOutcome::Failed);
        let rows = assemble(tour, date, collected.rows);
        let log = log_entry(&key, started_at, outcome, rows_ok, rows_failed, summary.clone());

        let committed = self.store.lock().await.commit(&key, &rows, &log);
        match committed {
            Ok(receipt) => {
                advance(&mut guard, state);
                info!(
                    "Scrape for {} finished: {} ({} rows, {} failed)",
                    key,
                    outcome.as_str(),
                    rows_ok,
                    rows_failed
                );
                Ok(JobReport {
                    tour_id: key.tour_id.clone(),
                    date,
                    state,
                    outcome,
                    rows_ok,
                    rows_failed,
                    snapshot_id: Some(receipt.snapshot_id),
                    log_id: receipt.log_id,
                    error: summary,
                })
            }
            Err(e) => {
                error!("Commit for {} failed: {}", key, e);
                advance(&mut guard, JobState::Failed);
                let message = e.to_string();
                let failed = log_entry(
                    &key,
                    started_at,
                    ScrapeOutcome::Failed,
                    0,
                    rows_failed,
                    Some(ScrapeError::CommitFailed(message.clone()).to_string()),
                );
                if let Err(e) = self.store.lock().await.record_log(&failed) {
                    error!("Cannot record failed commit of {}: {}", key, e);
                }
                Err(ScrapeError::CommitFailed(message))
            }
        }
    }

    async fn finish_failed(
        &self,
        guard: &mut JobGuard,
        started_at: DateTime<Utc>,
        rows_ok: usize,
        rows_failed: usize,
        summary: String,
    ) -> Result<JobReport, ScrapeError> {
        let key = guard.key().clone();
        advance(guard, JobState::Failed);
        warn!("Scrape for {} failed: {}", key, summary);

        let log = log_entry(&key, started_at, ScrapeOutcome::Failed, rows_ok, rows_failed, Some(summary.clone()));
        let log_id = self
            .store
            .lock()
            .await
            .record_log(&log)
            .map_err(|e| ScrapeError::CommitFailed(e.to_string()))?;

        Ok(JobReport {
            tour_id: key.tour_id,
            date: key.date,
            state: JobState::Failed,
            outcome: ScrapeOutcome::Failed,
            rows_ok,
            rows_failed,
            snapshot_id: None,
            log_id,
            error: Some(summary),
        })
    }

    async fn run(
        &self,
        tour: &Tour,
        date: NaiveDate,
        cancel: &CancelToken,
        deadline: Instant,
    ) -> Result<Collected, RunError> {
        let attempts = self.timing.retry_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(tour, date, cancel, deadline).await {
                Err(RunError::Retryable(e)) if attempt < attempts => {
                    let delay = self.backoff_with_jitter(attempt);
                    warn!(
                        "Attempt {}/{} for {} on {} failed: {}. Retrying in {:?}",
                        attempt, attempts, tour.id, date, e, delay
                    );
                    tokio::select! {
                        reason = interruption(cancel, deadline) => return Err(RunError::Cancelled(reason)),
                        _ = sleep(delay) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// One pass with its own browser session. The session is closed on every path.
    async fn attempt(
        &self,
        tour: &Tour,
        date: NaiveDate,
        cancel: &CancelToken,
        deadline: Instant,
    ) -> Result<Collected, RunError> {
        let wait = self.timing.session_wait();
        let permit = tokio::select! {
            reason = interruption(cancel, deadline) => return Err(RunError::Cancelled(reason)),
            permit = timeout(wait, self.sessions.clone().acquire_owned()) => match permit {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(RunError::Fatal("browser pool is shut down".into())),
                Err(_) => return Err(RunError::Fatal(format!("no browser session free within {:?}", wait))),
            },
        };

        let mut driver = tokio::select! {
            reason = interruption(cancel, deadline) => return Err(RunError::Cancelled(reason)),
            launched = self.launcher.launch() => launched.map_err(RunError::Retryable)?,
        };

        let result = tokio::select! {
            reason = interruption(cancel, deadline) => Err(RunError::Cancelled(reason)),
            collected = self.collect(driver.as_mut(), tour, date) => collected.map_err(RunError::Retryable),
        };

        driver.close().await;
        drop(permit);
        result
    }

    async fn collect(
        &self,
        driver: &mut dyn PageDriver,
        tour: &Tour,
        date: NaiveDate,
    ) -> Result<Collected, DriverError> {
        let mut rows = self.enumerator.enumerate(driver, tour, date).await?;
        let mut collected = Collected {
            rows: Vec::with_capacity(rows.total()),
            failures: Vec::new(),
        };

        while let Some(row) = rows.next_row().await {
            match row {
                Ok(reading) => collected.rows.push(reading),
                Err(failure) => {
                    warn!("Row {} of {} on {} failed: {}", failure.time, tour.id, date, failure.error);
                    collected.failures.push(failure);
                }
            }
        }

        Ok(collected)
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.timing.backoff(attempt);
        let spread = (base.as_millis() as u64 / 4).max(1);
        base + Duration::from_millis(rand::rng().random_range(0..spread))
    }
}

async fn interruption(cancel: &CancelToken, deadline: Instant) -> String {
    tokio::select! {
        _ = cancel.cancelled() => cancel.reason(),
        _ = sleep_until(deadline) => DEADLINE_REASON.to_string(),
    }
}

fn advance(guard: &mut JobGuard, next: JobState) {
    if let Err(e) = guard.advance(next) {
        error!("{} for {}", e, guard.key());
    }
}

fn log_entry(
    key: &JobKey,
    started_at: DateTime<Utc>,
    outcome: ScrapeOutcome,
    rows_extracted: usize,
    rows_failed: usize,
    error_summary: Option<String>,
) -> LogEntry {
    LogEntry {
        tour_id: key.tour_id.clone(),
        date: key.date,
        started_at,
        finished_at: Utc::now(),
        outcome,
        rows_extracted,
        rows_failed,
        error_summary,
    }
}

fn failure_summary(failures: Vec<RowFailure>) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    Some(
        failures
            .into_iter()
            .map(|f| format!("{}: {}", f.time, ScrapeError::from(f.error)))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn assemble(tour: &TourConfig, date: NaiveDate, readings: Vec<RowReading>) -> Vec<Schedule> {
    let extracted_at = Utc::now();
    let mut rows: Vec<Schedule> = readings
        .into_iter()
        .map(|reading| Schedule {
            tour_id: tour.id.clone(),
            date,
            start_time: reading.time,
            operator_id: reading.provider_id,
            operator_name: String::new(),
            price: reading.quote.amount,
            currency: reading.quote.currency,
            capacity: reading.capacity,
            extracted_at,
            source_selector: reading.quote.selector,
        })
        .collect();
    normalize_all(&mut rows, &tour.operators);
    rows
}
