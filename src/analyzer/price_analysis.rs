use crate::model::Schedule;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Trait defining the interface for a snapshot analyzer.
pub trait Analyzer {
    fn summarize(&self, rows: &[Schedule]) -> Option<PriceSummary>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorPrice {
    pub operator: String,
    pub rows: usize,
    pub min_price: Decimal,
}

/// Price statistics for one snapshot. Rows in a currency other than the first row's are
/// left out of the figures and counted in `skipped`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSummary {
    pub rows: usize,
    pub currency: String,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub avg_price: Decimal,
    pub cheapest_operator: String,
    pub cheapest_time: String,
    pub operators: Vec<OperatorPrice>,
    pub skipped: usize,
}

pub struct AnalyzerImpl;

impl AnalyzerImpl {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AnalyzerImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for AnalyzerImpl {
    fn summarize(&self, rows: &[Schedule]) -> Option<PriceSummary> {
        let currency = rows.first()?.currency.clone();
        let priced: Vec<&Schedule> = rows.iter().filter(|r| r.currency == currency).collect();

        // Earliest slot wins a price tie.
        let cheapest = priced
            .iter()
            .min_by(|a, b| a.price.cmp(&b.price).then_with(|| a.start_time.cmp(&b.start_time)))?;
        let max_price = priced.iter().map(|r| r.price).max()?;
        let avg_price = mean(priced.iter().map(|r| r.price), priced.len()).round_dp(2);

        let mut by_operator: BTreeMap<&str, (usize, Decimal)> = BTreeMap::new();
        for row in &priced {
            let entry = by_operator
                .entry(row.operator_name.as_str())
                .or_insert((0, row.price));
            entry.0 += 1;
            entry.1 = entry.1.min(row.price);
        }
        let mut operators: Vec<OperatorPrice> = by_operator
            .into_iter()
            .map(|(operator, (rows, min_price))| OperatorPrice {
                operator: operator.to_string(),
                rows,
                min_price,
            })
            .collect();
        operators.sort_by(|a, b| a.min_price.cmp(&b.min_price).then_with(|| a.operator.cmp(&b.operator)));

        Some(PriceSummary {
            rows: priced.len(),
            currency,
            min_price: cheapest.price,
            max_price,
            avg_price,
            cheapest_operator: cheapest.operator_name.clone(),
            cheapest_time: cheapest.start_time.clone(),
            operators,
            skipped: rows.len() - priced.len(),
        })
    }
}

/// Exact when the total fits in a Decimal, otherwise averaged term by term.
fn mean(prices: impl Iterator<Item = Decimal> + Clone, count: usize) -> Decimal {
    let count = Decimal::from(count);
    match prices.clone().try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p)) {
        Some(total) => total / count,
        None => prices.map(|p| p / count).sum(),
    }
}
