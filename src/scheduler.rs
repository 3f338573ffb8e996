// Periodic sweep over every configured tour and upcoming date
use crate::config::{AppConfig, TourConfig};
use crate::model::{ScrapeError, ScrapeOutcome};
use crate::orchestrator::{CancelToken, ScrapeOrchestrator};
use crate::utils::date_window;
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use std::ops::AddAssign;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    /// Dates already being scraped by someone else.
    pub skipped: usize,
}

impl AddAssign for SweepStats {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.partial += other.partial;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Starts the sweep loop. Each pass goes through the same `trigger` path as manual requests,
/// so a date being scraped on demand is skipped rather than scraped twice.
pub fn spawn_sweep(orchestrator: Arc<ScrapeOrchestrator>, config: Arc<AppConfig>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config.scheduler.interval_seconds);
        loop {
            let today = Utc::now().date_naive();
            info!(
                "Sweep started: {} tours, {} days from {}",
                config.tours.len(),
                config.scheduler.days_ahead,
                today
            );
            let stats = sweep_once(&orchestrator, &config.tours, today, config.scheduler.days_ahead).await;
            info!(
                "Sweep finished: {} succeeded, {} partial, {} failed, {} skipped. Next in {}s",
                stats.succeeded,
                stats.partial,
                stats.failed,
                stats.skipped,
                interval.as_secs()
            );
            sleep(interval).await;
        }
    })
}

/// Tours run concurrently; dates within a tour run one after another.
pub async fn sweep_once(
    orchestrator: &ScrapeOrchestrator,
    tours: &[TourConfig],
    start: NaiveDate,
    days: u32,
) -> SweepStats {
    let tasks: Vec<_> = tours
        .iter()
        .map(|tour| sweep_tour(orchestrator, tour, start, days))
        .collect();

    let mut total = SweepStats::default();
    for stats in join_all(tasks).await {
        total += stats;
    }
    total
}

async fn sweep_tour(
    orchestrator: &ScrapeOrchestrator,
    tour: &TourConfig,
    start: NaiveDate,
    days: u32,
) -> SweepStats {
    let mut stats = SweepStats::default();

    for date in date_window(start, days) {
        match orchestrator.trigger(tour, date, CancelToken::new()).await {
            Ok(report) => match report.outcome {
                ScrapeOutcome::Success => stats.succeeded += 1,
                ScrapeOutcome::Partial => stats.partial += 1,
                ScrapeOutcome::Failed => stats.failed += 1,
            },
            Err(ScrapeError::LockContention(key)) => {
                info!("Skipping {}: already running", key);
                stats.skipped += 1;
            }
            Err(ScrapeError::CommitFailed(message)) => {
                error!("Sweep commit failed for {} on {}: {}", tour.id, date, message);
                stats.failed += 1;
            }
            Err(e) => {
                warn!("Sweep scrape of {} on {} ended: {}", tour.id, date, e);
                stats.failed += 1;
            }
        }
    }

    stats
}
