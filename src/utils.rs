// Utility functions
use chrono::{Datelike, Duration, NaiveDate};

/// Parses a `YYYY-MM-DD` date, if possible.
pub fn parse_date(date_str: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d").ok()
}

/// `days` consecutive dates starting at `start`.
pub fn date_window(start: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days as i64).map(|i| start + Duration::days(i)).collect()
}

/// Number of month steps from `from` to the month of `to` (negative goes back).
pub fn month_offset(from: (i32, u32), to: NaiveDate) -> i32 {
    (to.year() - from.0) * 12 + (to.month() as i32 - from.1 as i32)
}
