use crate::model::{
    CalendarDay, Capacity, CommitReceipt, JobKey, LogEntry, Schedule, ScrapeLog, ScrapeOutcome, Snapshot,
    SnapshotState, StorageError, Tour,
};
use crate::storage::SnapshotStore;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

const SCHEDULE_COLUMNS: &str = "tour_id, date, start_time, operator_id, operator_name, price, currency, \
                                capacity, extracted_at, source_selector";

const LOG_COLUMNS: &str = "id, tour_id, date, started_at, finished_at, outcome, rows_extracted, rows_failed, \
                           error_summary";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens the database and creates the schema if missing.
    pub fn new(db_path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS tours (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scrape_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tour_id TEXT NOT NULL,
                date TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                outcome TEXT NOT NULL,
                rows_extracted INTEGER NOT NULL,
                rows_failed INTEGER NOT NULL,
                error_summary TEXT
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tour_id TEXT NOT NULL,
                date TEXT NOT NULL,
                log_id INTEGER NOT NULL REFERENCES scrape_logs(id),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
                tour_id TEXT NOT NULL,
                date TEXT NOT NULL,
                start_time TEXT NOT NULL,
                operator_id TEXT,
                operator_name TEXT NOT NULL,
                price TEXT NOT NULL,
                currency TEXT NOT NULL,
                capacity INTEGER,
                extracted_at TEXT NOT NULL,
                source_selector TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS current_snapshots (
                tour_id TEXT NOT NULL,
                date TEXT NOT NULL,
                snapshot_id INTEGER NOT NULL REFERENCES snapshots(id),
                PRIMARY KEY (tour_id, date)
            );

            CREATE INDEX IF NOT EXISTS idx_schedules_snapshot ON schedules(snapshot_id);
            CREATE INDEX IF NOT EXISTS idx_scrape_logs_tour ON scrape_logs(tour_id, id);
            ",
        )?;

        Ok(Self { conn })
    }

    /// Upserts the configured tour catalog.
    pub fn sync_tours(&mut self, tours: &[Tour]) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tours (id, external_id, name, url) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    external_id = excluded.external_id, name = excluded.name, url = excluded.url",
            )?;
            for tour in tours {
                stmt.execute(params![&tour.id, &tour.external_id, &tour.name, &tour.url])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_log(conn: &Connection, log: &LogEntry) -> Result<i64, rusqlite::Error> {
        conn.execute(
            "INSERT INTO scrape_logs (
                tour_id, date, started_at, finished_at, outcome, rows_extracted, rows_failed, error_summary
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &log.tour_id,
                &log.date,
                &log.started_at.to_rfc3339(),
                &log.finished_at.to_rfc3339(),
                log.outcome.as_str(),
                log.rows_extracted as i64,
                log.rows_failed as i64,
                &log.error_summary,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn snapshot_rows(&self, snapshot_id: i64) -> Result<Vec<Schedule>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM schedules WHERE snapshot_id = ?1 ORDER BY start_time ASC, id ASC",
            SCHEDULE_COLUMNS
        ))?;

        let rows = stmt.query_map(params![snapshot_id], Self::map_schedule)?;
        let mut schedules = Vec::new();
        for row in rows {
            schedules.push(row?);
        }

        Ok(schedules)
    }

    fn parse_timestamp(row: &Row, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
        let raw: String = row.get(idx)?;
        raw.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn map_schedule(row: &Row) -> Result<Schedule, rusqlite::Error> {
        let price_str: String = row.get(5)?;
        let price = Decimal::from_str(&price_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
        let capacity: Option<u32> = row.get(7)?;

        Ok(Schedule {
            tour_id: row.get(0)?,
            date: row.get(1)?,
            start_time: row.get(2)?,
            operator_id: row.get(3)?,
            operator_name: row.get(4)?,
            price,
            currency: row.get(6)?,
            capacity: Capacity::from(capacity),
            extracted_at: Self::parse_timestamp(row, 8)?,
            source_selector: row.get(9)?,
        })
    }

    fn map_log(row: &Row) -> Result<ScrapeLog, rusqlite::Error> {
        let outcome_str: String = row.get(5)?;
        let outcome = ScrapeOutcome::parse(&outcome_str)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(5, "outcome".to_string(), Type::Text))?;
        let rows_extracted: i64 = row.get(6)?;
        let rows_failed: i64 = row.get(7)?;

        Ok(ScrapeLog {
            id: row.get(0)?,
            tour_id: row.get(1)?,
            date: row.get(2)?,
            started_at: Self::parse_timestamp(row, 3)?,
            finished_at: Self::parse_timestamp(row, 4)?,
            outcome,
            rows_extracted: rows_extracted.max(0) as usize,
            rows_failed: rows_failed.max(0) as usize,
            error_summary: row.get(8)?,
        })
    }
}

impl SnapshotStore for SqliteStorage {
    fn commit(&mut self, key: &JobKey, rows: &[Schedule], log: &LogEntry) -> Result<CommitReceipt, StorageError> {
        let tx = self.conn.transaction()?;

        let log_id = Self::insert_log(&tx, log)?;
        tx.execute(
            "INSERT INTO snapshots (tour_id, date, log_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![&key.tour_id, &key.date, log_id, &log.finished_at.to_rfc3339()],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO schedules (snapshot_id, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                SCHEDULE_COLUMNS
            ))?;
            for row in rows {
                stmt.execute(params![
                    snapshot_id,
                    &row.tour_id,
                    &row.date,
                    &row.start_time,
                    &row.operator_id,
                    &row.operator_name,
                    row.price.to_string(),
                    &row.currency,
                    row.capacity.as_option(),
                    &row.extracted_at.to_rfc3339(),
                    &row.source_selector,
                ])?;
            }
        }

        let previous: Option<i64> = tx
            .query_row(
                "SELECT snapshot_id FROM current_snapshots WHERE tour_id = ?1 AND date = ?2",
                params![&key.tour_id, &key.date],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO current_snapshots (tour_id, date, snapshot_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(tour_id, date) DO UPDATE SET snapshot_id = excluded.snapshot_id",
            params![&key.tour_id, &key.date, snapshot_id],
        )?;

        // Superseded snapshots are not kept; the log history is.
        if let Some(previous_id) = previous {
            tx.execute("DELETE FROM schedules WHERE snapshot_id = ?1", params![previous_id])?;
            tx.execute("DELETE FROM snapshots WHERE id = ?1", params![previous_id])?;
        }

        tx.commit()?;
        debug!("Committed snapshot {} for {} ({} rows)", snapshot_id, key, rows.len());

        Ok(CommitReceipt { snapshot_id, log_id })
    }

    fn record_log(&mut self, log: &LogEntry) -> Result<i64, StorageError> {
        Ok(Self::insert_log(&self.conn, log)?)
    }

    fn current_snapshot(&self, key: &JobKey) -> Result<SnapshotState, StorageError> {
        let found: Option<(i64, i64, String)> = self
            .conn
            .query_row(
                "SELECT s.id, s.log_id, s.created_at
                 FROM current_snapshots c JOIN snapshots s ON s.id = c.snapshot_id
                 WHERE c.tour_id = ?1 AND c.date = ?2",
                params![&key.tour_id, &key.date],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((id, log_id, created_at)) = found else {
            return Ok(SnapshotState::NeverScraped);
        };
        let created_at: DateTime<Utc> = created_at
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        Ok(SnapshotState::Committed(Snapshot {
            id,
            tour_id: key.tour_id.clone(),
            date: key.date,
            log_id,
            created_at,
            rows: self.snapshot_rows(id)?,
        }))
    }

    fn calendar(&self, tour_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<CalendarDay>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.date, COUNT(sc.id)
             FROM current_snapshots c LEFT JOIN schedules sc ON sc.snapshot_id = c.snapshot_id
             WHERE c.tour_id = ?1 AND c.date BETWEEN ?2 AND ?3
             GROUP BY c.date ORDER BY c.date ASC",
        )?;

        let rows = stmt.query_map(params![tour_id, &from, &to], |row| {
            let date: NaiveDate = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok(CalendarDay {
                date,
                has_data: true,
                rows: count.max(0) as usize,
            })
        })?;

        let mut days = Vec::new();
        for day in rows {
            days.push(day?);
        }

        Ok(days)
    }

    fn scrape_logs(&self, tour_id: &str, limit: usize) -> Result<Vec<ScrapeLog>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM scrape_logs WHERE tour_id = ?1 ORDER BY id DESC LIMIT ?2",
            LOG_COLUMNS
        ))?;

        let rows = stmt.query_map(params![tour_id, limit as i64], Self::map_log)?;
        let mut logs = Vec::new();
        for log in rows {
            logs.push(log?);
        }

        Ok(logs)
    }

    fn list_tours(&self) -> Result<Vec<Tour>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT id, external_id, name, url FROM tours ORDER BY id ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok(Tour {
                id: row.get(0)?,
                external_id: row.get(1)?,
                name: row.get(2)?,
                url: row.get(3)?,
            })
        })?;

        let mut tours = Vec::new();
        for tour in rows {
            tours.push(tour?);
        }

        Ok(tours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 10).unwrap()
    }

    fn key() -> JobKey {
        JobKey::new("coliseo", day())
    }

    fn row(time: &str, operator: &str, price: &str, capacity: Option<u32>) -> Schedule {
        Schedule {
            tour_id: "coliseo".to_string(),
            date: day(),
            start_time: time.to_string(),
            operator_id: Some(operator.to_string()),
            operator_name: format!("Proveedor #{}", operator),
            price: dec(price),
            currency: "EUR".to_string(),
            capacity: Capacity::from(capacity),
            extracted_at: Utc.with_ymd_and_hms(2026, 1, 20, 9, 0, 0).unwrap(),
            source_selector: "#tPrecioSpan0".to_string(),
        }
    }

    fn log(outcome: ScrapeOutcome, extracted: usize, failed: usize) -> LogEntry {
        LogEntry {
            tour_id: "coliseo".to_string(),
            date: day(),
            started_at: Utc.with_ymd_and_hms(2026, 1, 20, 9, 0, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2026, 1, 20, 9, 1, 0).unwrap(),
            outcome,
            rows_extracted: extracted,
            rows_failed: failed,
            error_summary: None,
        }
    }

    fn committed(storage: &SqliteStorage) -> Snapshot {
        match storage.current_snapshot(&key()).unwrap() {
            SnapshotState::Committed(snapshot) => snapshot,
            SnapshotState::NeverScraped => panic!("expected a committed snapshot"),
        }
    }

    fn count(storage: &SqliteStorage, table: &str) -> i64 {
        storage
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn schedules_table_is_created_complete() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        let mut stmt = storage.conn.prepare("PRAGMA table_info(schedules)").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |r| r.get(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for column in SCHEDULE_COLUMNS.split(',').map(str::trim) {
            assert!(columns.iter().any(|c| c == column), "missing column {}", column);
        }
    }

    #[test]
    fn unknown_key_is_never_scraped() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        assert!(matches!(
            storage.current_snapshot(&key()).unwrap(),
            SnapshotState::NeverScraped
        ));
    }

    #[test]
    fn commit_round_trips_rows() {
        let mut storage = SqliteStorage::new(":memory:").unwrap();
        let rows = vec![
            row("09:00", "36417", "25.00", Some(8)),
            row("11:30", "285", "27.50", None),
        ];

        let receipt = storage
            .commit(&key(), &rows, &log(ScrapeOutcome::Success, 2, 0))
            .unwrap();

        let snapshot = committed(&storage);
        assert_eq!(snapshot.id, receipt.snapshot_id);
        assert_eq!(snapshot.log_id, receipt.log_id);
        assert_eq!(snapshot.rows, rows);
        assert_eq!(snapshot.rows[1].capacity, Capacity::Unknown);
    }

    #[test]
    fn empty_commit_is_distinct_from_never_scraped() {
        let mut storage = SqliteStorage::new(":memory:").unwrap();
        storage
            .commit(&key(), &[], &log(ScrapeOutcome::Success, 0, 0))
            .unwrap();

        let snapshot = committed(&storage);
        assert!(snapshot.rows.is_empty());
    }

    #[test]
    fn recommit_replaces_rows_and_keeps_both_logs() {
        let mut storage = SqliteStorage::new(":memory:").unwrap();
        let rows = vec![row("09:00", "36417", "25.00", Some(8))];

        let first = storage
            .commit(&key(), &rows, &log(ScrapeOutcome::Success, 1, 0))
            .unwrap();
        let second = storage
            .commit(&key(), &rows, &log(ScrapeOutcome::Success, 1, 0))
            .unwrap();

        assert_ne!(first.snapshot_id, second.snapshot_id);
        let snapshot = committed(&storage);
        assert_eq!(snapshot.id, second.snapshot_id);
        assert_eq!(snapshot.rows, rows);

        assert_eq!(count(&storage, "snapshots"), 1);
        assert_eq!(count(&storage, "schedules"), 1);
        assert_eq!(storage.scrape_logs("coliseo", 10).unwrap().len(), 2);
    }

    #[test]
    fn failed_commit_leaves_previous_state() {
        let mut storage = SqliteStorage::new(":memory:").unwrap();
        let good = vec![row("09:00", "36417", "25.00", Some(8))];
        storage
            .commit(&key(), &good, &log(ScrapeOutcome::Success, 1, 0))
            .unwrap();

        storage
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_rows BEFORE INSERT ON schedules
                 WHEN NEW.start_time = '13:00'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let bad = vec![
            row("09:00", "36417", "30.00", Some(4)),
            row("13:00", "285", "31.00", None),
        ];
        let result = storage.commit(&key(), &bad, &log(ScrapeOutcome::Success, 2, 0));
        assert!(result.is_err());

        assert_eq!(committed(&storage).rows, good);
        assert_eq!(storage.scrape_logs("coliseo", 10).unwrap().len(), 1);
        assert_eq!(count(&storage, "snapshots"), 1);
    }

    #[test]
    fn record_log_does_not_touch_snapshot() {
        let mut storage = SqliteStorage::new(":memory:").unwrap();
        let rows = vec![row("09:00", "36417", "25.00", Some(8))];
        storage
            .commit(&key(), &rows, &log(ScrapeOutcome::Success, 1, 0))
            .unwrap();

        let mut failed = log(ScrapeOutcome::Failed, 0, 1);
        failed.error_summary = Some("navigation failed: timeout".to_string());
        storage.record_log(&failed).unwrap();

        assert_eq!(committed(&storage).rows, rows);
        let logs = storage.scrape_logs("coliseo", 10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].outcome, ScrapeOutcome::Failed);
        assert_eq!(logs[0].error_summary.as_deref(), Some("navigation failed: timeout"));
        assert_eq!(logs[1].outcome, ScrapeOutcome::Success);
    }

    #[test]
    fn calendar_reports_committed_days_in_range() {
        let mut storage = SqliteStorage::new(":memory:").unwrap();
        storage
            .commit(
                &key(),
                &[row("09:00", "36417", "25.00", None), row("10:00", "285", "26.00", None)],
                &log(ScrapeOutcome::Success, 2, 0),
            )
            .unwrap();

        let other_day = NaiveDate::from_ymd_opt(2026, 2, 12).unwrap();
        storage
            .commit(
                &JobKey::new("coliseo", other_day),
                &[],
                &log(ScrapeOutcome::Success, 0, 0),
            )
            .unwrap();

        let days = storage
            .calendar("coliseo", day(), NaiveDate::from_ymd_opt(2026, 2, 11).unwrap())
            .unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, day());
        assert_eq!(days[0].rows, 2);

        let days = storage.calendar("coliseo", day(), other_day).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[1].rows, 0);
        assert!(days[1].has_data);
    }

    #[test]
    fn sync_tours_upserts() {
        let mut storage = SqliteStorage::new(":memory:").unwrap();
        let mut tour = Tour {
            id: "coliseo".to_string(),
            external_id: "1507".to_string(),
            name: "Visita guiada".to_string(),
            url: "https://www.civitatis.com/es/roma/visita-guiada-roma-antigua/".to_string(),
        };
        storage.sync_tours(std::slice::from_ref(&tour)).unwrap();
        tour.name = "Visita guiada por el Coliseo".to_string();
        storage.sync_tours(std::slice::from_ref(&tour)).unwrap();

        assert_eq!(storage.list_tours().unwrap(), vec![tour]);
    }
}
