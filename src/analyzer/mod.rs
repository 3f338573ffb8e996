// Analyzer module: price statistics over committed snapshots.

pub mod price_analysis;

pub use price_analysis::{Analyzer, AnalyzerImpl, PriceSummary};
