//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Auto-event interval grammar."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
//! Intervals come in two spellings:
//!
//! * ISO-8601 durations without calendar units: `PT5S`, `PT1M30S`, `P1DT2H`,
//!   `PT0.5S`, `P1W`.
//! * Compact unit sequences: `500ms`, `10s`, `1m30s`, `1h`, also `ns` and `us`.
//!
//! Both reject unknown characters, components that overflow and a zero total.

use std::time::Duration;

use ds_common::{DsError, DsResult};

const NANOS_PER_SEC: u128 = 1_000_000_000;
const MINUTE: u128 = 60 * NANOS_PER_SEC;
const HOUR: u128 = 60 * MINUTE;
const DAY: u128 = 24 * HOUR;
const WEEK: u128 = 7 * DAY;

const ISO_DATE_UNITS: &[(&str, u128)] = &[("W", WEEK), ("D", DAY)];
const ISO_TIME_UNITS: &[(&str, u128)] = &[("H", HOUR), ("M", MINUTE), ("S", NANOS_PER_SEC)];
const COMPACT_UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", NANOS_PER_SEC),
    ("m", MINUTE),
    ("h", HOUR),
];

/// Resolve an auto-event interval to a positive duration.
pub fn parse_interval(text: &str) -> DsResult<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DsError::contract_invalid("interval must not be empty"));
    }
    let nanos = match text.strip_prefix('P') {
        Some(body) => parse_iso(body, text)?,
        None => parse_compact(text)?,
    };
    if nanos == 0 {
        return Err(DsError::contract_invalid(format!(
            "interval {text} must be positive"
        )));
    }
    let nanos = u64::try_from(nanos).map_err(|_| overflow(text))?;
    Ok(Duration::from_nanos(nanos))
}

fn parse_iso(body: &str, original: &str) -> DsResult<u128> {
    let (date, time) = match body.split_once('T') {
        Some((_, "")) => return Err(invalid(original, "no time components after T")),
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };
    if date.contains(['Y', 'M']) {
        return Err(invalid(original, "years and months are not supported"));
    }
    let (mut total, mut count) = components(date, ISO_DATE_UNITS, true, original)?;
    if let Some(time) = time {
        let (time_total, time_count) = components(time, ISO_TIME_UNITS, true, original)?;
        total = total.checked_add(time_total).ok_or_else(|| overflow(original))?;
        count += time_count;
    }
    if count == 0 {
        return Err(invalid(original, "no components"));
    }
    Ok(total)
}

fn parse_compact(text: &str) -> DsResult<u128> {
    let (total, _) = components(text, COMPACT_UNITS, false, text)?;
    Ok(total)
}

/// Sum `<number><unit>` pairs. With `ordered`, each unit may appear at most
/// once and only after the units listed before it.
fn components(
    mut input: &str,
    units: &[(&str, u128)],
    ordered: bool,
    original: &str,
) -> DsResult<(u128, usize)> {
    let mut total: u128 = 0;
    let mut count = 0;
    let mut next = 0;
    while !input.is_empty() {
        let number_end = input
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(input.len());
        if number_end == 0 {
            return Err(invalid(original, "expected a number"));
        }
        let (number, rest) = input.split_at(number_end);
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let (unit, rest) = rest.split_at(unit_end);
        if unit.is_empty() {
            return Err(invalid(original, "missing unit"));
        }
        let candidates = if ordered { &units[next..] } else { units };
        let position = candidates
            .iter()
            .position(|(name, _)| *name == unit)
            .ok_or_else(|| invalid(original, &format!("unexpected unit '{unit}'")))?;
        if ordered {
            next += position + 1;
        }
        let scaled = scale(number, candidates[position].1, original)?;
        total = total.checked_add(scaled).ok_or_else(|| overflow(original))?;
        count += 1;
        input = rest;
    }
    Ok((total, count))
}

fn scale(number: &str, unit_nanos: u128, original: &str) -> DsResult<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return Err(invalid(original, &format!("malformed number '{number}'")));
    }
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow(original))?
    };
    let mut nanos = whole
        .checked_mul(unit_nanos)
        .ok_or_else(|| overflow(original))?;
    if !fraction.is_empty() {
        // Digits past nanosecond resolution of a week cannot matter.
        let digits = &fraction[..fraction.len().min(18)];
        let value: u128 = digits.parse().map_err(|_| overflow(original))?;
        let denominator = 10u128.pow(digits.len() as u32);
        nanos = nanos
            .checked_add(value * unit_nanos / denominator)
            .ok_or_else(|| overflow(original))?;
    }
    Ok(nanos)
}

fn invalid(original: &str, reason: &str) -> DsError {
    DsError::contract_invalid(format!("invalid interval {original}: {reason}"))
}

fn overflow(original: &str) -> DsError {
    DsError::contract_invalid(format!("interval {original} overflows"))
}
