// Booking-form price extraction with selector fallback and a settle wait
use crate::config::{ReadFrom, SelectorRule};
use crate::model::{ExtractionError, PriceQuote};
use crate::parser::money::parse_money;
use crate::scraper::PageDriver;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

const PROVIDER_INPUT: &str = "#idProveedor";

#[derive(Debug, Clone, Copy)]
pub struct SettlePolicy {
    pub timeout: Duration,
    pub poll: Duration,
}

/// The element that won the selector race and its raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub selector: String,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct SettledRead {
    pub quote: PriceQuote,
    pub provider_id: Option<String>,
}

pub struct PriceExtractor {
    rules: Vec<SelectorRule>,
    settle: SettlePolicy,
    default_currency: String,
}

impl PriceExtractor {
    pub fn new(rules: Vec<SelectorRule>, settle: SettlePolicy, default_currency: &str) -> Self {
        Self {
            rules,
            settle,
            default_currency: default_currency.to_string(),
        }
    }

    /// Walks the rules in priority order and returns the first present, non-empty value.
    pub fn locate(&self, html: &str) -> Option<Located> {
        let document = Html::parse_document(html);
        self.locate_in(&document)
    }

    fn locate_in(&self, document: &Html) -> Option<Located> {
        self.rules.iter().find_map(|rule| {
            let selector = Selector::parse(&rule.selector).ok()?;
            document
                .select(&selector)
                .map(|element| read_element(element, rule.read))
                .find(|raw| !raw.is_empty())
                .map(|raw| Located {
                    selector: rule.selector.clone(),
                    raw,
                })
        })
    }

    /// One-shot read without waiting for the page to settle.
    #[cfg(test)]
    pub fn extract(&self, html: &str) -> Result<PriceQuote, ExtractionError> {
        let located = self.locate(html).ok_or(ExtractionError::NoSelectorMatched)?;
        self.quote(located, false)
    }

    fn quote(&self, located: Located, rechecked: bool) -> Result<PriceQuote, ExtractionError> {
        let (amount, currency) = parse_money(&located.raw, &self.default_currency)
            .ok_or_else(|| ExtractionError::Unparsable(located.raw.clone()))?;
        Ok(PriceQuote {
            amount,
            currency,
            raw: located.raw,
            selector: located.selector,
            rechecked,
        })
    }

    fn inspect(&self, html: &str) -> (Option<Located>, Option<String>) {
        let document = Html::parse_document(html);
        (self.locate_in(&document), provider_in(&document))
    }

    /// Reads the price after a selection. Polls until the located value moves away from
    /// `baseline` (the value shown before the click) or the settle timeout elapses; on
    /// timeout the last read stands, since two schedules may well cost the same.
    pub async fn read_settled(
        &self,
        driver: &mut dyn PageDriver,
        baseline: Option<&str>,
    ) -> Result<SettledRead, ExtractionError> {
        let deadline = Instant::now() + self.settle.timeout;
        let mut rechecked = false;

        loop {
            let html = driver.content().await?;
            let (located, provider_id) = self.inspect(&html);
            let changed = match (&located, baseline) {
                (Some(found), Some(before)) => found.raw != before,
                (Some(_), None) => true,
                (None, _) => false,
            };

            if changed || Instant::now() >= deadline {
                if !changed {
                    debug!("Price did not change within settle window (baseline {:?})", baseline);
                }
                let located = located.ok_or(ExtractionError::NoSelectorMatched)?;
                return Ok(SettledRead {
                    quote: self.quote(located, rechecked)?,
                    provider_id,
                });
            }

            rechecked = true;
            sleep(self.settle.poll).await;
        }
    }
}

fn read_element(element: ElementRef<'_>, read: ReadFrom) -> String {
    match read {
        ReadFrom::Text => element
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
        ReadFrom::Value => element.value().attr("value").unwrap_or("").trim().to_string(),
    }
}

fn provider_in(document: &Html) -> Option<String> {
    let selector = Selector::parse(PROVIDER_INPUT).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("value"))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
