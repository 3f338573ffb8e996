use crate::model::Tour;
use scraper::Selector;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TourConfig {
    pub id: String,
    pub external_id: String,
    pub name: String,
    pub url: String,
    /// Provider id as seen in the page -> operator display name.
    #[serde(default)]
    pub operators: HashMap<String, String>,
}

impl TourConfig {
    pub fn tour(&self) -> Tour {
        Tour {
            id: self.id.clone(),
            external_id: self.external_id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadFrom {
    #[default]
    Text,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SelectorRule {
    pub selector: String,
    #[serde(default)]
    pub read: ReadFrom,
}

impl SelectorRule {
    pub fn text(selector: &str) -> Self {
        Self { selector: selector.to_string(), read: ReadFrom::Text }
    }

    pub fn value(selector: &str) -> Self {
        Self { selector: selector.to_string(), read: ReadFrom::Value }
    }
}

/// Visible display first, structural classes next, hidden inputs last: the hidden
/// inputs keep the previously selected price until the page re-renders.
pub fn default_price_selectors() -> Vec<SelectorRule> {
    vec![
        SelectorRule::text("#tPrecioSpan0"),
        SelectorRule::text(".m-activity-price__top .a-text--price--big"),
        SelectorRule::text(".a-text--price--big"),
        SelectorRule::text(".pax-price"),
        SelectorRule::text("[class*=\"price-final\"]"),
        SelectorRule::text(".total-price"),
        SelectorRule::text(".booking-price"),
        SelectorRule::text(".m-activity-price__total"),
        SelectorRule::value("#precioTotal"),
        SelectorRule::value("input#precioActividad"),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub navigation_timeout_ms: u64,
    pub render_timeout_ms: u64,
    pub settle_timeout_ms: u64,
    pub settle_poll_ms: u64,
    pub calendar_step_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub session_wait_ms: u64,
    pub job_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 60_000,
            render_timeout_ms: 15_000,
            settle_timeout_ms: 3_000,
            settle_poll_ms: 150,
            calendar_step_ms: 600,
            retry_attempts: 3,
            retry_backoff_ms: 2_000,
            session_wait_ms: 120_000,
            job_timeout_secs: 600,
        }
    }
}

impl TimingConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn settle_poll(&self) -> Duration {
        Duration::from_millis(self.settle_poll_ms)
    }

    pub fn calendar_step(&self) -> Duration {
        Duration::from_millis(self.calendar_step_ms)
    }

    pub fn session_wait(&self) -> Duration {
        Duration::from_millis(self.session_wait_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(6);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub max_sessions: usize,
    pub headless: bool,
    pub user_agent: String,
    pub accept_language: String,
    pub chrome_path: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_sessions: 2,
            headless: true,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
            accept_language: "es-ES".into(),
            chrome_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: "data.db".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub days_ahead: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 24 * 60 * 60,
            days_ahead: 30,
        }
    }
}

fn default_currency() -> String {
    "EUR".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub tours: Vec<TourConfig>,
    #[serde(default = "default_price_selectors")]
    pub price_selectors: Vec<SelectorRule>,
    #[serde(default = "default_currency")]
    pub default_currency: String,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tours.is_empty() {
            return Err(ConfigError::Invalid("at least one tour must be configured".into()));
        }
        let mut ids = HashSet::new();
        for tour in &self.tours {
            if !ids.insert(tour.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate tour id {}", tour.id)));
            }
        }
        if self.price_selectors.is_empty() {
            return Err(ConfigError::Invalid("price_selectors must not be empty".into()));
        }
        for rule in &self.price_selectors {
            Selector::parse(&rule.selector).map_err(|e| {
                ConfigError::Invalid(format!("bad price selector {:?}: {}", rule.selector, e))
            })?;
        }
        if self.browser.max_sessions == 0 {
            return Err(ConfigError::Invalid("browser.max_sessions must be at least 1".into()));
        }
        if self.timing.retry_attempts == 0 {
            return Err(ConfigError::Invalid("timing.retry_attempts must be at least 1".into()));
        }
        if self.timing.job_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timing.job_timeout_secs must be at least 1".into()));
        }
        if self.timing.settle_poll_ms == 0 {
            return Err(ConfigError::Invalid("timing.settle_poll_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn tour(&self, id: &str) -> Option<&TourConfig> {
        self.tours.iter().find(|t| t.id == id)
    }
}

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    AppConfig::from_json(&content)
}
