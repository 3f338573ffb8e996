// Price and capacity text normalization
use crate::model::Capacity;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:[ \u{a0}\u{202f}]\d{3})+(?:,\d{1,2})?|\d[\d.,]*").unwrap()
});

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Parses display text such as `45,00 €`, `1.234,50 €` or `$1,234.50` into an amount and a
/// currency code. Text without a currency marker gets `default_currency`.
pub fn parse_money(text: &str, default_currency: &str) -> Option<(Decimal, String)> {
    let number = AMOUNT.find(text)?.as_str();
    let amount = parse_amount(number)?;
    Some((amount, detect_currency(text).unwrap_or(default_currency).to_string()))
}

fn detect_currency(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    if text.contains('€') || upper.contains("EUR") {
        Some("EUR")
    } else if text.contains('£') || upper.contains("GBP") {
        Some("GBP")
    } else if text.contains('$') || upper.contains("USD") {
        Some("USD")
    } else {
        None
    }
}

fn parse_amount(number: &str) -> Option<Decimal> {
    let compact: String = number
        .trim_end_matches(['.', ','])
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .collect();

    let decimal_sep = match (compact.rfind(','), compact.rfind('.')) {
        (Some(c), Some(d)) => Some(if c > d { ',' } else { '.' }),
        (Some(c), None) => single_decimal(&compact, ',', c),
        (None, Some(d)) => single_decimal(&compact, '.', d),
        (None, None) => None,
    };

    let normalized: String = compact
        .chars()
        .filter_map(|c| match c {
            '0'..='9' => Some(c),
            _ if Some(c) == decimal_sep => Some('.'),
            _ => None,
        })
        .collect();

    Decimal::from_str(&normalized).ok()
}

/// A lone separator followed by one or two digits is a decimal mark; anything else
/// (`1.234`, `1,234,567`) is grouping.
fn single_decimal(s: &str, sep: char, pos: usize) -> Option<char> {
    let occurrences = s.matches(sep).count();
    let tail = s.len() - pos - 1;
    (occurrences == 1 && (1..=2).contains(&tail)).then_some(sep)
}

/// `6`, `Últimas 6 plazas` -> 6 seats; absent, empty or `unknown` -> `Unknown`.
pub fn parse_capacity(raw: Option<&str>) -> Capacity {
    raw.and_then(|text| DIGITS.find(text))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .into()
}
