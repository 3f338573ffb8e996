pub mod sqlite;

use crate::model::{
    CalendarDay, CommitReceipt, JobKey, LogEntry, Schedule, ScrapeLog, SnapshotState, StorageError, Tour,
};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use sqlite::SqliteStorage;

/// Snapshot persistence. `commit` is all-or-nothing: the new snapshot replaces the current
/// one for the key together with its log entry, or nothing changes.
pub trait SnapshotStore: Send {
    fn commit(&mut self, key: &JobKey, rows: &[Schedule], log: &LogEntry) -> Result<CommitReceipt, StorageError>;
    /// Appends a log entry for a run that produced no snapshot.
    fn record_log(&mut self, log: &LogEntry) -> Result<i64, StorageError>;
    fn current_snapshot(&self, key: &JobKey) -> Result<SnapshotState, StorageError>;
    fn calendar(&self, tour_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<CalendarDay>, StorageError>;
    fn scrape_logs(&self, tour_id: &str, limit: usize) -> Result<Vec<ScrapeLog>, StorageError>;
    fn list_tours(&self) -> Result<Vec<Tour>, StorageError>;
}

pub type SharedStore = Arc<Mutex<dyn SnapshotStore>>;
