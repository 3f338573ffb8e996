pub mod chrome;
pub mod enumerator;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use chrome::ChromeLauncher;
pub use enumerator::{RowFailure, RowReading, ScheduleEnumerator};
pub use traits::{BrowserLauncher, PageDriver};
