//! Brazilian number formats: period thousands separator, comma decimal,
//! `k`/`mil` multipliers, `R$`/`US$`/`USDT` currency prefixes.

use crate::models::Currency;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::OnceLock;

fn amount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(r\$|us\$|usdt|brl)?\s*([0-9][0-9.,]*)\s*(k\b|mil\b|usdt\b|brl\b|reais\b)?")
            .expect("static pattern compiles")
    })
}

/// An amount found inside free text, with the currency its prefix/suffix
/// implied (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAmount {
    pub value: Decimal,
    pub currency: Option<Currency>,
}

/// Parse a standalone amount string. Returns `None` for empty, non-numeric
/// or non-positive input.
///
/// `"4.479.100,50"` -> 4_479_100.50, `"10k"` -> 10_000,
/// `"R$ 5,25"` -> 5.25, `"5 mil"` -> 5_000.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let mut s = text.trim().to_ascii_lowercase();
    if s.is_empty() {
        return None;
    }

    // Currency prefixes are tolerated here; callers that care about the
    // currency use `extract_amount`.
    for prefix in ["r$", "us$", "usdt", "brl"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim().to_string();
            break;
        }
    }

    let mut multiplier = Decimal::ONE;
    if let Some(rest) = s.strip_suffix("mil") {
        multiplier = dec!(1000);
        s = rest.trim().to_string();
    } else if let Some(rest) = s.strip_suffix('k') {
        multiplier = dec!(1000);
        s = rest.trim().to_string();
    }

    let normalized = normalize_number(&s)?;
    let value: Decimal = normalized.parse().ok()?;
    let value = value * multiplier;
    if value <= Decimal::ZERO {
        return None;
    }
    Some(value)
}

/// Rewrite a Brazilian-formatted number into `Decimal`-parseable form.
///
/// With a comma present, periods are thousands separators. Without one, a
/// lone period is only a decimal point when its fraction is not a
/// three-digit group (`"5.25"` -> 5.25, `"4.479"` -> 4479).
fn normalize_number(s: &str) -> Option<String> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }
    if !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    if let Some(comma) = s.rfind(',') {
        let (int_part, frac_part) = s.split_at(comma);
        let frac_part = &frac_part[1..];
        if frac_part.is_empty() || frac_part.contains(',') || frac_part.contains('.') {
            return None;
        }
        if int_part.contains(',') {
            return None;
        }
        let int_digits: String = int_part.chars().filter(|c| *c != '.').collect();
        return Some(format!("{}.{}", int_digits, frac_part));
    }

    let dots = s.matches('.').count();
    if dots == 0 {
        return Some(s.to_string());
    }
    if dots == 1 {
        let (int_part, frac_part) = s.split_once('.').unwrap();
        if int_part.is_empty() || frac_part.is_empty() {
            return None;
        }
        if frac_part.len() == 3 {
            // "4.479" reads as four thousand four hundred seventy nine.
            return Some(format!("{}{}", int_part, frac_part));
        }
        return Some(s.to_string());
    }
    // Multiple periods: all thousands separators, groups must be 3 digits.
    let mut parts = s.split('.');
    let first = parts.next()?;
    if first.is_empty() {
        return None;
    }
    let mut out = first.to_string();
    for group in parts {
        if group.len() != 3 || !group.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        out.push_str(group);
    }
    Some(out)
}

/// Find the first amount inside free message text, honoring currency
/// prefixes (`R$`, `US$`, `USDT`) and suffixes (`usdt`, `brl`, `reais`).
pub fn extract_amount(text: &str) -> Option<ExtractedAmount> {
    for cap in amount_regex().captures_iter(text) {
        let number = cap.get(2)?.as_str().trim_end_matches(['.', ',']);
        let prefix = cap.get(1).map(|m| m.as_str().to_ascii_lowercase());
        let suffix = cap.get(3).map(|m| m.as_str().to_ascii_lowercase());

        let mut raw = number.to_string();
        if matches!(suffix.as_deref(), Some("k") | Some("mil")) {
            raw.push('k');
        }

        let Some(value) = parse_amount(&raw) else {
            continue;
        };

        let currency = match (prefix.as_deref(), suffix.as_deref()) {
            (Some("r$"), _) | (Some("brl"), _) | (_, Some("brl")) | (_, Some("reais")) => {
                Some(Currency::Brl)
            }
            (Some("us$"), _) | (Some("usdt"), _) | (_, Some("usdt")) => Some(Currency::Usdt),
            _ => None,
        };

        return Some(ExtractedAmount { value, currency });
    }
    None
}

/// Format a rate for group messages: four decimals, comma separator
/// (`5.226` -> `"5,2260"`).
pub fn format_rate(rate: Decimal) -> String {
    let truncated = rate.trunc_with_scale(4);
    format!("{:.4}", truncated).replace('.', ",")
}

/// Format an amount Brazilian-style: period thousands, comma decimals
/// (`4479100.5` -> `"4.479.100,50"`).
pub fn format_amount(amount: Decimal) -> String {
    let truncated = amount.trunc_with_scale(2);
    let plain = format!("{:.2}", truncated);
    let (int_part, frac_part) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let negative = int_part.starts_with('-');
    let digits = int_part.trim_start_matches('-');
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    let sign = if negative { "-" } else { "" };
    format!("{}{},{}", sign, grouped, frac_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_brazilian_thousands() {
        assert_eq!(parse_amount("4.479.100,50"), Some(dec!(4479100.50)));
        assert_eq!(parse_amount("1.000"), Some(dec!(1000)));
        assert_eq!(parse_amount("1.000,00"), Some(dec!(1000)));
    }

    #[test]
    fn parses_multipliers() {
        assert_eq!(parse_amount("10k"), Some(dec!(10000)));
        assert_eq!(parse_amount("2,5k"), Some(dec!(2500)));
        assert_eq!(parse_amount("5 mil"), Some(dec!(5000)));
    }

    #[test]
    fn parses_currency_prefixes() {
        assert_eq!(parse_amount("R$ 5,25"), Some(dec!(5.25)));
        assert_eq!(parse_amount("US$ 100"), Some(dec!(100)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount("-1"), None);
        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount("1,2,3"), None);
    }

    #[test]
    fn lone_period_decimal_vs_thousands() {
        assert_eq!(parse_amount("5.25"), Some(dec!(5.25)));
        assert_eq!(parse_amount("4.479"), Some(dec!(4479)));
    }

    #[test]
    fn extracts_from_message_text() {
        let hit = extract_amount("trava 10000").unwrap();
        assert_eq!(hit.value, dec!(10000));
        assert_eq!(hit.currency, None);

        let hit = extract_amount("fecha R$ 4.479.100,50 por favor").unwrap();
        assert_eq!(hit.value, dec!(4479100.50));
        assert_eq!(hit.currency, Some(Currency::Brl));

        let hit = extract_amount("quero 850 mil usdt").unwrap();
        assert_eq!(hit.value, dec!(850000));

        assert!(extract_amount("bom dia").is_none());
    }

    #[test]
    fn extracts_usdt_suffix() {
        let hit = extract_amount("5000 usdt").unwrap();
        assert_eq!(hit.value, dec!(5000));
        assert_eq!(hit.currency, Some(Currency::Usdt));
    }

    #[test]
    fn tolerates_trailing_punctuation() {
        let hit = extract_amount("trava 10000, por favor").unwrap();
        assert_eq!(hit.value, dec!(10000));
    }

    #[test]
    fn formats_rate_with_comma() {
        assert_eq!(format_rate(dec!(5.226)), "5,2260");
        assert_eq!(format_rate(dec!(5.22609)), "5,2260");
    }

    #[test]
    fn formats_amount_brazilian() {
        assert_eq!(format_amount(dec!(4479100.5)), "4.479.100,50");
        assert_eq!(format_amount(dec!(1913.509)), "1.913,50");
        assert_eq!(format_amount(dec!(100)), "100,00");
    }
}
