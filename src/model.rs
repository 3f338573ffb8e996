// Core structs: Tour, Schedule, Snapshot, ScrapeLog and the error taxonomy
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tour {
    pub id: String,
    pub external_id: String,
    pub name: String,
    pub url: String,
}

/// Unit of mutual exclusion: one scrape per tour and date at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub tour_id: String,
    pub date: NaiveDate,
}

impl JobKey {
    pub fn new(tour_id: &str, date: NaiveDate) -> Self {
        Self {
            tour_id: tour_id.to_string(),
            date,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.tour_id, self.date)
    }
}

/// Remaining seats. The site often omits the figure; that is `Unknown`, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Capacity {
    Remaining(u32),
    Unknown,
}

impl Capacity {
    pub fn as_option(self) -> Option<u32> {
        match self {
            Capacity::Remaining(n) => Some(n),
            Capacity::Unknown => None,
        }
    }
}

impl From<Option<u32>> for Capacity {
    fn from(value: Option<u32>) -> Self {
        value.map(Capacity::Remaining).unwrap_or(Capacity::Unknown)
    }
}

/// Raw extraction result for one row before it becomes a `Schedule`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub amount: Decimal,
    pub currency: String,
    pub raw: String,
    pub selector: String,
    pub rechecked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub tour_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub operator_id: Option<String>,
    pub operator_name: String,
    pub price: Decimal,
    pub currency: String,
    pub capacity: Capacity,
    pub extracted_at: DateTime<Utc>,
    pub source_selector: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: i64,
    pub tour_id: String,
    pub date: NaiveDate,
    pub log_id: i64,
    pub created_at: DateTime<Utc>,
    pub rows: Vec<Schedule>,
}

#[derive(Debug, Clone)]
pub enum SnapshotState {
    NeverScraped,
    Committed(Snapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeOutcome {
    Success,
    Partial,
    Failed,
}

impl ScrapeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrapeOutcome::Success => "success",
            ScrapeOutcome::Partial => "partial",
            ScrapeOutcome::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(ScrapeOutcome::Success),
            "partial" => Some(ScrapeOutcome::Partial),
            "failed" => Some(ScrapeOutcome::Failed),
            _ => None,
        }
    }
}

/// A log entry about to be appended.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub tour_id: String,
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ScrapeOutcome,
    pub rows_extracted: usize,
    pub rows_failed: usize,
    pub error_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeLog {
    pub id: i64,
    pub tour_id: String,
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ScrapeOutcome,
    pub rows_extracted: usize,
    pub rows_failed: usize,
    pub error_summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitReceipt {
    pub snapshot_id: i64,
    pub log_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub has_data: bool,
    pub rows: usize,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("page interaction failed: {0}")]
    Interaction(String),
}

/// Row-local failures. They are counted, never raised past the orchestrator.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no price selector matched")]
    NoSelectorMatched,
    #[error("unparsable price text {0:?}")]
    Unparsable(String),
    #[error("row element unavailable: {0}")]
    Dom(#[from] DriverError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("extraction failed: {0}")]
    ExtractionFailed(#[from] ExtractionError),
    #[error("navigation failed: {0}")]
    NavigationFailed(String),
    #[error("a scrape for {0} is already running")]
    LockContention(JobKey),
    #[error("commit failed: {0}")]
    CommitFailed(String),
    #[error("scrape cancelled: {0}")]
    Cancelled(String),
}
