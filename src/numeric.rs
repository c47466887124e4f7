//! Numeric value normalization for reported facts.
//!
//! Filings mix decimal conventions (`1.234,56` next to `1,234.56`), wrap
//! negatives in parentheses and pad numbers with non-breaking spaces. All of
//! that is resolved here and nowhere else: callers hand over the raw text and
//! the `decimals` hint and get back a plain `f64`, or `None` when the text is
//! not a number at all.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Normalize a raw textual number into a signed value.
///
/// The separator that occurs last is the decimal point when both `,` and `.`
/// are present. A lone `,` is a decimal point unless every comma opens a
/// group of exactly three digits (`1,000`, `(12,500)`), which is thousands
/// grouping. More than one remaining
/// `.` means integer grouping and all dots are dropped. A non-negative
/// `decimals` hint rounds to that many fractional digits; negative hints are
/// ignored.
pub fn normalize(raw: &str, decimals: Option<i32>) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let negative = trimmed.contains('(') && trimmed.contains(')');

    let stripped: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .collect();

    let separated = match (stripped.rfind(','), stripped.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => stripped.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => stripped.replace(',', ""),
        (Some(_), None) if is_comma_grouping(&stripped) => stripped.replace(',', ""),
        (Some(_), None) => stripped.replace(',', "."),
        _ => stripped,
    };

    let mut literal = String::with_capacity(separated.len() + 1);
    for ch in separated.chars() {
        match ch {
            '0'..='9' | '.' => literal.push(ch),
            '-' if literal.is_empty() => literal.push(ch),
            _ => {}
        }
    }

    if literal.matches('.').count() > 1 {
        literal.retain(|c| c != '.');
    }

    if !is_decimal_literal(&literal) {
        return None;
    }

    if negative && !literal.starts_with('-') {
        literal.insert(0, '-');
    }

    if literal.ends_with('.') {
        literal.pop();
    }
    // `.5` and `-.5` get their leading zero
    if let Some(dot) = literal.find('.') {
        if dot == 0 || literal.as_bytes()[dot - 1] == b'-' {
            literal.insert(dot, '0');
        }
    }

    let value = match decimals {
        Some(digits) if digits >= 0 => round_to(&literal, digits as u32)?,
        _ => literal.parse().ok()?,
    };

    // collapse -0 into 0
    Some(value + 0.0)
}

/// Parse a `decimals` attribute into a rounding hint. `INF` carries no hint.
pub fn parse_decimals_hint(attr: &str) -> Option<i32> {
    let attr = attr.trim();
    if attr.eq_ignore_ascii_case("INF") {
        return None;
    }
    attr.parse().ok()
}

/// The strict check applied to classic instance facts at persistence time:
/// only plain literals such as `-1234.5` are accepted, nothing is rewritten.
pub fn canonical_decimal(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) {
        return None;
    }
    match frac_part {
        Some(frac) if !all_digits(frac) => None,
        _ => Some(trimmed),
    }
}

fn is_comma_grouping(text: &str) -> bool {
    let mut segments = text.split(',');
    let lead: String = segments
        .next()
        .unwrap_or_default()
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if lead.is_empty() || lead == "0" {
        return false;
    }
    segments.all(|segment| segment.chars().take_while(|c| c.is_ascii_digit()).count() == 3)
}

fn is_decimal_literal(literal: &str) -> bool {
    let body = literal.strip_prefix('-').unwrap_or(literal);
    let mut digits = 0;
    let mut dots = 0;
    for b in body.bytes() {
        match b {
            b'0'..=b'9' => digits += 1,
            b'.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

/// Round the literal in decimal, half away from zero. Literals too large
/// for `Decimal` are returned unrounded.
fn round_to(literal: &str, digits: u32) -> Option<f64> {
    match Decimal::from_str(literal) {
        Ok(decimal) => decimal
            .round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero)
            .to_string()
            .parse()
            .ok(),
        Err(_) => literal.parse().ok(),
    }
}
