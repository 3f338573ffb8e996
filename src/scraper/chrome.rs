// Chrome-backed page driver. headless_chrome is blocking, so every call runs on the
// blocking pool.
use crate::config::{BrowserConfig, TimingConfig};
use crate::model::DriverError;
use crate::scraper::{BrowserLauncher, PageDriver};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

const WINDOW: (u32, u32) = (1920, 1080);
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ChromeLauncher {
    config: BrowserConfig,
    navigation_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig, timing: &TimingConfig) -> Self {
        Self {
            config,
            navigation_timeout: timing.navigation_timeout(),
        }
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        let config = self.config.clone();
        let navigation_timeout = self.navigation_timeout;

        let (browser, tab) = spawn_blocking(move || -> Result<(Browser, Arc<Tab>), String> {
            let options = LaunchOptions::default_builder()
                .headless(config.headless)
                .window_size(Some(WINDOW))
                .path(config.chrome_path.map(PathBuf::from))
                .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
                .build()
                .map_err(|e| e.to_string())?;
            let browser = Browser::new(options).map_err(|e| e.to_string())?;
            let tab = browser.new_tab().map_err(|e| e.to_string())?;
            tab.set_default_timeout(navigation_timeout);
            tab.set_user_agent(&config.user_agent, Some(&config.accept_language), None)
                .map_err(|e| e.to_string())?;
            Ok((browser, tab))
        })
        .await
        .map_err(|e| DriverError::Launch(e.to_string()))?
        .map_err(DriverError::Launch)?;

        info!("Browser session started");
        Ok(Box::new(ChromePage {
            browser: Some(browser),
            tab,
        }))
    }
}

struct ChromePage {
    browser: Option<Browser>,
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn run<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Tab) -> Result<T, String> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| format!("browser task failed: {}", e))?
    }
}

/// JS that sets a `<select>` value and fires `change` so the page recomputes the price.
fn select_script(select_id: &str, value: &str) -> String {
    let id = Value::String(select_id.to_string());
    let value = Value::String(value.to_string());
    format!(
        "(() => {{ const s = document.getElementById({id}); if (!s) return false; \
         s.value = {value}; s.dispatchEvent(new Event('change', {{ bubbles: true }})); \
         return true; }})()"
    )
}

#[async_trait::async_trait]
impl PageDriver for ChromePage {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        let url = url.to_string();
        self.run(move |tab| {
            tab.navigate_to(&url).map_err(|e| e.to_string())?;
            tab.wait_until_navigated().map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
        .map_err(DriverError::Navigation)
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
        let selector = selector.to_string();
        self.run(move |tab| Ok(tab.wait_for_element_with_custom_timeout(&selector, timeout).is_ok()))
            .await
            .map_err(DriverError::Interaction)
    }

    async fn click(&mut self, selector: &str) -> Result<bool, DriverError> {
        let selector = selector.to_string();
        self.run(move |tab| match tab.find_element(&selector) {
            Ok(element) => {
                element.click().map_err(|e| e.to_string())?;
                Ok(true)
            }
            Err(_) => Ok(false),
        })
        .await
        .map_err(DriverError::Interaction)
    }

    async fn scroll_to(&mut self, selector: &str) -> Result<bool, DriverError> {
        let selector = selector.to_string();
        self.run(move |tab| match tab.find_element(&selector) {
            Ok(element) => {
                element.scroll_into_view().map_err(|e| e.to_string())?;
                Ok(true)
            }
            Err(_) => Ok(false),
        })
        .await
        .map_err(DriverError::Interaction)
    }

    async fn select_value(&mut self, select_id: &str, value: &str) -> Result<bool, DriverError> {
        let script = select_script(select_id, value);
        self.run(move |tab| {
            let result = tab.evaluate(&script, false).map_err(|e| e.to_string())?;
            Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
        })
        .await
        .map_err(DriverError::Interaction)
    }

    async fn content(&mut self) -> Result<String, DriverError> {
        self.run(|tab| tab.get_content().map_err(|e| e.to_string()))
            .await
            .map_err(DriverError::Interaction)
    }

    async fn close(&mut self) {
        let tab = self.tab.clone();
        let browser = self.browser.take();
        let closed = spawn_blocking(move || {
            let result = tab.close(true).map(|_| ()).map_err(|e| e.to_string());
            drop(browser);
            result
        })
        .await;

        match closed {
            Ok(Ok(())) => debug!("Browser session closed"),
            Ok(Err(e)) => warn!("Closing tab failed: {}", e),
            Err(e) => warn!("Browser close task failed: {}", e),
        }
    }
}
