// Tour page navigation: date picker, schedule list and row iteration
use crate::config::TimingConfig;
use crate::model::{Capacity, DriverError, ExtractionError, PriceQuote, Tour};
use crate::parser::PriceExtractor;
use crate::parser::money::parse_capacity;
use crate::scraper::PageDriver;
use crate::utils::month_offset;
use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};

const OVERLAY_DISMISS: &[&str] = &[
    "button#didomi-notice-agree-button",
    "[class*=\"cookie\"] button",
    ".accept-cookies",
    ".ic-close",
    "[class*=\"chat\"] .close",
    "[class*=\"chat\"] button[class*=\"close\"]",
    ".chat-close",
    "[aria-label=\"Close\"]",
    "[aria-label=\"Cerrar\"]",
];
const OVERLAY_PAUSE: Duration = Duration::from_millis(300);
pub const BOOKING_SECTION: &[&str] = &["#formReservaActividad", "#activity-navbar", ".booking-form"];

pub const CALENDAR: &str = ".clndr-table";
const CALENDAR_DAYS: &str = ".clndr-table td.day";
pub const NEXT_MONTH: &str = ".clndr-next-button";
pub const PREV_MONTH: &str = ".clndr-previous-button";
pub const SCHEDULE_SELECT_ID: &str = "horaActividad";
const SCHEDULE_OPTIONS: &str = "#horaActividad option";
pub const SCHEDULE_RADIOS: &str = "input[name=\"horaActividad-radios\"]";
const MAX_MONTH_STEPS: i32 = 24;

static DAY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"calendar-day-(\d{4})-(\d{2})-(\d{2})").unwrap());

pub fn day_cell_selector(date: NaiveDate) -> String {
    format!("td[class*=\"calendar-day-{}\"]", date.format("%Y-%m-%d"))
}

pub fn radio_selector(time: &str) -> String {
    format!("{}[value=\"{}\"]", SCHEDULE_RADIOS, time)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOption {
    pub time: String,
    pub quota: Option<String>,
}

/// One schedule row as read from the booking form after selecting it.
#[derive(Debug, Clone)]
pub struct RowReading {
    pub time: String,
    pub provider_id: Option<String>,
    pub quote: PriceQuote,
    pub capacity: Capacity,
}

#[derive(Debug)]
pub struct RowFailure {
    pub time: String,
    pub error: ExtractionError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayState {
    Bookable,
    Inactive,
    Missing,
}

pub struct ScheduleEnumerator {
    extractor: PriceExtractor,
    timing: TimingConfig,
}

impl ScheduleEnumerator {
    pub fn new(extractor: PriceExtractor, timing: TimingConfig) -> Self {
        Self { extractor, timing }
    }

    /// Opens the tour page, picks `date` in the site's calendar and returns the rows to read.
    /// A date the site shows as inactive, or one that renders no schedules, yields no rows.
    pub async fn enumerate<'d>(
        &'d self,
        driver: &'d mut dyn PageDriver,
        tour: &Tour,
        date: NaiveDate,
    ) -> Result<ScheduleRows<'d>, DriverError> {
        info!("Opening {} for {}", tour.url, date);
        timeout(self.timing.navigation_timeout(), driver.goto(&tour.url))
            .await
            .map_err(|_| DriverError::Timeout(format!("loading {}", tour.url)))??;

        self.dismiss_overlays(&mut *driver).await;
        self.scroll_to_booking(&mut *driver).await;

        if !driver.wait_for(CALENDAR, self.timing.render_timeout()).await? {
            return Err(DriverError::Navigation("calendar did not render".into()));
        }

        let options = match self.select_date(&mut *driver, date).await? {
            DayState::Inactive => {
                info!("{} is not bookable for {}", date, tour.name);
                Vec::new()
            }
            _ => self.wait_for_schedules(&mut *driver).await?,
        };
        debug!("{} schedules listed for {} on {}", options.len(), tour.id, date);

        Ok(ScheduleRows {
            driver,
            extractor: &self.extractor,
            total: options.len(),
            options: options.into_iter(),
        })
    }

    async fn dismiss_overlays(&self, driver: &mut dyn PageDriver) {
        for selector in OVERLAY_DISMISS {
            if let Ok(true) = driver.click(selector).await {
                debug!("Dismissed overlay {}", selector);
                sleep(OVERLAY_PAUSE).await;
            }
        }
    }

    /// Brings the booking form into view before the calendar is used.
    async fn scroll_to_booking(&self, driver: &mut dyn PageDriver) {
        for selector in BOOKING_SECTION {
            match driver.scroll_to(selector).await {
                Ok(true) => {
                    debug!("Scrolled to {}", selector);
                    sleep(self.timing.calendar_step()).await;
                    return;
                }
                Ok(false) => {}
                Err(e) => debug!("Scrolling to {} failed: {}", selector, e),
            }
        }
    }

    async fn select_date(
        &self,
        driver: &mut dyn PageDriver,
        date: NaiveDate,
    ) -> Result<DayState, DriverError> {
        let html = driver.content().await?;
        let shown = displayed_month(&html)
            .ok_or_else(|| DriverError::Navigation("cannot read the calendar month".into()))?;

        let steps = month_offset(shown, date);
        if steps.abs() > MAX_MONTH_STEPS {
            return Err(DriverError::Navigation(format!(
                "{} is {} months away from the calendar",
                date, steps
            )));
        }

        let button = if steps > 0 { NEXT_MONTH } else { PREV_MONTH };
        for _ in 0..steps.abs() {
            if !driver.click(button).await? {
                return Err(DriverError::Navigation(format!("{} is not clickable", button)));
            }
            sleep(self.timing.calendar_step()).await;
        }

        let html = driver.content().await?;
        match day_state(&html, date) {
            DayState::Missing => Err(DriverError::Navigation(format!(
                "{} is not shown in the calendar",
                date
            ))),
            DayState::Inactive => Ok(DayState::Inactive),
            DayState::Bookable => {
                if !driver.click(&day_cell_selector(date)).await? {
                    return Err(DriverError::Navigation(format!("cannot click {}", date)));
                }
                Ok(DayState::Bookable)
            }
        }
    }

    async fn wait_for_schedules(
        &self,
        driver: &mut dyn PageDriver,
    ) -> Result<Vec<ScheduleOption>, DriverError> {
        let deadline = Instant::now() + self.timing.render_timeout();
        loop {
            let options = schedule_options(&driver.content().await?);
            if !options.is_empty() {
                return Ok(options);
            }
            if Instant::now() >= deadline {
                info!("No schedules rendered, treating the date as sold out");
                return Ok(options);
            }
            sleep(self.timing.settle_poll()).await;
        }
    }
}

/// Lazy row sequence for one date. Consumed once; a new pass needs a new `enumerate`.
pub struct ScheduleRows<'d> {
    driver: &'d mut dyn PageDriver,
    extractor: &'d PriceExtractor,
    options: std::vec::IntoIter<ScheduleOption>,
    total: usize,
}

impl ScheduleRows<'_> {
    pub fn total(&self) -> usize {
        self.total
    }

    pub async fn next_row(&mut self) -> Option<Result<RowReading, RowFailure>> {
        let option = self.options.next()?;
        let result = self.read_row(&option).await;
        Some(result.map_err(|error| RowFailure {
            time: option.time,
            error,
        }))
    }

    async fn read_row(&mut self, option: &ScheduleOption) -> Result<RowReading, ExtractionError> {
        let before = self.driver.content().await?;
        let baseline = self.extractor.locate(&before).map(|found| found.raw);

        choose(&mut *self.driver, &option.time).await?;
        let read = self
            .extractor
            .read_settled(&mut *self.driver, baseline.as_deref())
            .await?;
        debug!(
            "Row {} read {:?} via {} (rechecked: {})",
            option.time, read.quote.raw, read.quote.selector, read.quote.rechecked
        );

        Ok(RowReading {
            time: option.time.clone(),
            provider_id: read.provider_id,
            quote: read.quote,
            capacity: parse_capacity(option.quota.as_deref()),
        })
    }
}

/// Radio buttons trigger the price update more reliably; the `<select>` is the fallback.
async fn choose(driver: &mut dyn PageDriver, time: &str) -> Result<(), ExtractionError> {
    if driver.click(&radio_selector(time)).await? {
        return Ok(());
    }
    if driver.select_value(SCHEDULE_SELECT_ID, time).await? {
        return Ok(());
    }
    Err(DriverError::Interaction(format!("schedule {} is not selectable", time)).into())
}

fn displayed_month(html: &str) -> Option<(i32, u32)> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(CALENDAR_DAYS).ok()?;
    document
        .select(&selector)
        .filter_map(|cell| cell.value().attr("class"))
        .filter(|class| !class.contains("adjacent-month"))
        .find_map(|class| {
            let caps = DAY_CLASS.captures(class)?;
            Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
        })
}

fn day_state(html: &str, date: NaiveDate) -> DayState {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(CALENDAR_DAYS) else {
        return DayState::Missing;
    };
    let wanted = format!("calendar-day-{}", date.format("%Y-%m-%d"));
    let cells: Vec<String> = document
        .select(&selector)
        .filter_map(|cell| cell.value().attr("class"))
        .map(|class| class.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|class| class.split(' ').any(|c| c == wanted))
        .collect();

    let cell = cells
        .iter()
        .find(|class| !class.contains("adjacent-month"))
        .or_else(|| cells.first());
    match cell {
        None => DayState::Missing,
        Some(class) if class.split(' ').any(|c| c == "inactive") => DayState::Inactive,
        Some(_) => DayState::Bookable,
    }
}

fn schedule_options(html: &str) -> Vec<ScheduleOption> {
    let document = Html::parse_document(html);
    let mut options = Vec::new();

    if let Ok(selector) = Selector::parse(SCHEDULE_OPTIONS) {
        for option in document.select(&selector) {
            let value = option.value().attr("value").unwrap_or("").trim();
            if value.is_empty() {
                continue;
            }
            options.push(ScheduleOption {
                time: value.to_string(),
                quota: option
                    .value()
                    .attr("data-quota")
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .map(str::to_string),
            });
        }
    }

    if options.is_empty() {
        if let Ok(selector) = Selector::parse(SCHEDULE_RADIOS) {
            for radio in document.select(&selector) {
                let value = radio.value().attr("value").unwrap_or("").trim();
                if !value.is_empty() {
                    options.push(ScheduleOption {
                        time: value.to_string(),
                        quota: None,
                    });
                }
            }
        }
    }

    options
}
