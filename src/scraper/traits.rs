use crate::model::DriverError;
use std::time::Duration;

/// One browser tab. Calls are strictly sequential: the booking form has a single date and
/// schedule selector, so a session is never driven from two places at once.
#[async_trait::async_trait]
pub trait PageDriver: Send {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError>;
    /// `Ok(false)` when the selector did not appear before `timeout`.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool, DriverError>;
    /// `Ok(false)` when no element matches `selector`.
    async fn click(&mut self, selector: &str) -> Result<bool, DriverError>;
    /// Sets the value of the `<select>` with id `select_id` and fires `change`.
    async fn select_value(&mut self, select_id: &str, value: &str) -> Result<bool, DriverError>;
    /// Scrolls the first match into view; `Ok(false)` when nothing matches.
    async fn scroll_to(&mut self, selector: &str) -> Result<bool, DriverError>;
    async fn content(&mut self) -> Result<String, DriverError>;
    async fn close(&mut self);
}

#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, DriverError>;
}
