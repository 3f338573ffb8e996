pub mod cancel;
pub mod jobs;
pub mod runner;

pub use cancel::CancelToken;
pub use runner::{JobReport, ScrapeOrchestrator};
