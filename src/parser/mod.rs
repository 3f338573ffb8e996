pub mod money;
pub mod price_extractor;

pub use price_extractor::{PriceExtractor, SettlePolicy};
