//! Test doubles for the browser seam: a scripted page for extractor tests and a small
//! simulated booking site with a lagging price display for enumerator and job tests.

use crate::config::TimingConfig;
use crate::model::DriverError;
use crate::scraper::enumerator::{BOOKING_SECTION, CALENDAR, NEXT_MONTH, PREV_MONTH, SCHEDULE_RADIOS, SCHEDULE_SELECT_ID};
use crate::scraper::{BrowserLauncher, PageDriver};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        navigation_timeout_ms: 1_000,
        render_timeout_ms: 50,
        settle_timeout_ms: 200,
        settle_poll_ms: 2,
        calendar_step_ms: 1,
        retry_attempts: 3,
        retry_backoff_ms: 1,
        session_wait_ms: 1_000,
        job_timeout_secs: 10,
    }
}

/// Serves a fixed sequence of pages; the last one repeats.
pub struct ScriptedPage {
    pages: Vec<String>,
    reads: usize,
}

impl ScriptedPage {
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages, reads: 0 }
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

#[async_trait::async_trait]
impl PageDriver for ScriptedPage {
    async fn goto(&mut self, _url: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn wait_for(&mut self, _selector: &str, _timeout: Duration) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn click(&mut self, _selector: &str) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn select_value(&mut self, _select_id: &str, _value: &str) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn scroll_to(&mut self, _selector: &str) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn content(&mut self) -> Result<String, DriverError> {
        let index = self.reads.min(self.pages.len().saturating_sub(1));
        self.reads += 1;
        self.pages
            .get(index)
            .cloned()
            .ok_or_else(|| DriverError::Interaction("no page scripted".into()))
    }

    async fn close(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct FakeSlot {
    pub time: String,
    pub provider_id: String,
    pub price: String,
    pub quota: Option<u32>,
}

impl FakeSlot {
    pub fn new(time: &str, provider_id: &str, price: &str, quota: Option<u32>) -> Self {
        Self {
            time: time.into(),
            provider_id: provider_id.into(),
            price: price.into(),
            quota,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeSite {
    pub shown_month: (i32, u32),
    pub slots: HashMap<NaiveDate, Vec<FakeSlot>>,
    pub inactive: Vec<NaiveDate>,
    pub idle_price: String,
    /// Reads that still show the previous price after a schedule is picked.
    pub render_lag: usize,
    pub radios: bool,
    pub calendar: bool,
}

impl FakeSite {
    pub fn new(shown_month: (i32, u32)) -> Self {
        Self {
            shown_month,
            slots: HashMap::new(),
            inactive: Vec::new(),
            idle_price: "Desde 40,00 €".into(),
            render_lag: 1,
            radios: false,
            calendar: true,
        }
    }

    pub fn with_slots(mut self, date: NaiveDate, slots: Vec<FakeSlot>) -> Self {
        self.slots.insert(date, slots);
        self
    }

    pub fn inactive(mut self, date: NaiveDate) -> Self {
        self.inactive.push(date);
        self
    }
}

#[derive(Default)]
pub struct SessionStats {
    launched: AtomicUsize,
    closed: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    scrolls: AtomicUsize,
    /// Signalled whenever a session starts loading the tour page.
    pub entered: Notify,
}

impl SessionStats {
    fn open(&self) {
        self.launched.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn scrolls(&self) -> usize {
        self.scrolls.load(Ordering::SeqCst)
    }
}

pub struct FakeLauncher {
    site: Arc<FakeSite>,
    pub stats: Arc<SessionStats>,
    failing_gotos: Arc<AtomicUsize>,
    gate: Option<Arc<Notify>>,
}

impl FakeLauncher {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            stats: Arc::new(SessionStats::default()),
            failing_gotos: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    /// The first `n` page loads fail as if the connection dropped.
    pub fn failing_first(self, n: usize) -> Self {
        self.failing_gotos.store(n, Ordering::SeqCst);
        self
    }

    /// Page loads block until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        self.stats.open();
        Ok(Box::new(FakeBrowser {
            site: self.site.clone(),
            stats: self.stats.clone(),
            failing_gotos: self.failing_gotos.clone(),
            gate: self.gate.clone(),
            loaded: false,
            month: self.site.shown_month,
            date: None,
            slot: None,
            displayed: self.site.idle_price.clone(),
            pending: None,
            closed: false,
        }))
    }
}

struct FakeBrowser {
    site: Arc<FakeSite>,
    stats: Arc<SessionStats>,
    failing_gotos: Arc<AtomicUsize>,
    gate: Option<Arc<Notify>>,
    loaded: bool,
    month: (i32, u32),
    date: Option<NaiveDate>,
    slot: Option<usize>,
    displayed: String,
    pending: Option<(String, usize)>,
    closed: bool,
}

impl FakeBrowser {
    fn current_slots(&self) -> &[FakeSlot] {
        self.date
            .and_then(|d| self.site.slots.get(&d))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn choose(&mut self, time: &str) -> bool {
        let Some(index) = self.current_slots().iter().position(|s| s.time == time) else {
            return false;
        };
        let price = self.current_slots()[index].price.clone();
        self.slot = Some(index);
        self.pending = Some((price, self.site.render_lag));
        true
    }

    fn shift_month(&mut self, delta: i32) {
        let index = self.month.0 * 12 + self.month.1 as i32 - 1 + delta;
        self.month = (index.div_euclid(12), index.rem_euclid(12) as u32 + 1);
    }

    fn click_day(&mut self, selector: &str) -> bool {
        let raw = selector
            .trim_start_matches("td[class*=\"calendar-day-")
            .trim_end_matches("\"]");
        let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") else {
            return false;
        };
        if (day.year(), day.month()) != self.month {
            return false;
        }
        if !self.site.inactive.contains(&day) {
            self.date = Some(day);
            self.slot = None;
        }
        true
    }

    fn render(&self) -> String {
        let mut html = String::from("<html><body>");
        if self.site.calendar {
            html.push_str(
                r#"<div class="clndr"><div class="clndr-controls"><button class="clndr-previous-button">&lt;</button><button class="clndr-next-button">&gt;</button></div><table class="clndr-table"><tr>"#,
            );
            if let Some(first) = NaiveDate::from_ymd_opt(self.month.0, self.month.1, 1) {
                if let Some(prev) = first.pred_opt() {
                    html.push_str(&format!(
                        r#"<td class="day adjacent-month calendar-day-{}">{}</td>"#,
                        prev,
                        prev.day()
                    ));
                }
                let mut day = first;
                while day.month() == self.month.1 {
                    let inactive = if self.site.inactive.contains(&day) { " inactive" } else { "" };
                    html.push_str(&format!(
                        r#"<td class="day{} calendar-day-{}">{}</td>"#,
                        inactive,
                        day,
                        day.day()
                    ));
                    match day.succ_opt() {
                        Some(next) => day = next,
                        None => break,
                    }
                }
            }
            html.push_str("</tr></table></div>");
        }

        html.push_str(r#"<form id="formReservaActividad"><select id="horaActividad"><option value="">Selecciona una hora</option>"#);
        if !self.site.radios {
            for slot in self.current_slots() {
                let quota = slot.quota.map(|q| q.to_string()).unwrap_or_default();
                html.push_str(&format!(
                    r#"<option value="{}" data-quota="{}">{}</option>"#,
                    slot.time, quota, slot.time
                ));
            }
        }
        html.push_str("</select>");
        if self.site.radios {
            for slot in self.current_slots() {
                html.push_str(&format!(
                    r#"<input type="radio" name="horaActividad-radios" value="{}">"#,
                    slot.time
                ));
            }
        }

        let provider = self
            .slot
            .and_then(|i| self.current_slots().get(i))
            .map(|s| s.provider_id.as_str())
            .unwrap_or("");
        html.push_str(&format!(
            r#"<input type="hidden" id="idProveedor" value="{}"><span id="tPrecioSpan0">{}</span><input type="hidden" id="precioActividad" value="{}"></form></body></html>"#,
            provider, self.displayed, self.displayed
        ));
        html
    }
}

#[async_trait::async_trait]
impl PageDriver for FakeBrowser {
    async fn goto(&mut self, _url: &str) -> Result<(), DriverError> {
        self.stats.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let fail = self
            .failing_gotos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DriverError::Navigation("connection reset".into()));
        }
        self.loaded = true;
        self.month = self.site.shown_month;
        self.date = None;
        self.slot = None;
        self.displayed = self.site.idle_price.clone();
        self.pending = None;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<bool, DriverError> {
        if selector == CALENDAR {
            return Ok(self.loaded && self.site.calendar);
        }
        Ok(self.loaded)
    }

    async fn click(&mut self, selector: &str) -> Result<bool, DriverError> {
        if !self.loaded {
            return Ok(false);
        }
        let radio_prefix = format!("{}[value=\"", SCHEDULE_RADIOS);
        let clicked = match selector {
            NEXT_MONTH if self.site.calendar => {
                self.shift_month(1);
                true
            }
            PREV_MONTH if self.site.calendar => {
                self.shift_month(-1);
                true
            }
            s if s.starts_with("td[class*=\"calendar-day-") && self.site.calendar => self.click_day(s),
            s if s.starts_with(&radio_prefix) && self.site.radios => {
                let time = s.trim_start_matches(&radio_prefix).trim_end_matches("\"]").to_string();
                self.choose(&time)
            }
            _ => false,
        };
        Ok(clicked)
    }

    async fn scroll_to(&mut self, selector: &str) -> Result<bool, DriverError> {
        let found = self.loaded && selector == BOOKING_SECTION[0];
        if found {
            self.stats.scrolls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(found)
    }

    async fn select_value(&mut self, select_id: &str, value: &str) -> Result<bool, DriverError> {
        if select_id != SCHEDULE_SELECT_ID || self.site.radios {
            return Ok(false);
        }
        Ok(self.choose(value))
    }

    async fn content(&mut self) -> Result<String, DriverError> {
        if !self.loaded {
            return Err(DriverError::Navigation("page not loaded".into()));
        }
        if let Some((price, left)) = self.pending.take() {
            if left == 0 {
                self.displayed = price;
            } else {
                self.pending = Some((price, left - 1));
            }
        }
        Ok(self.render())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.close();
        }
    }
}
