//! Natural-language parameter extraction.
//!
//! Pure functions over the prompt text: no I/O, no hidden clock. Callers
//! pass `now` in the configured business time zone so results are
//! deterministic and locale-stable.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;

/// SKU alias table. A future iteration can load this from the database;
/// the lookup contract (ordered, deduplicated) stays the same.
const SKU_ALIASES: &[(&str, &[&str])] = &[
    ("iphone", &["APPL-IPH-001"]),
    ("macbook", &["APPL-MBP-001", "APPL-MBA-001"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumberUnits {
    pub percent: Option<f64>,
    pub days: Option<i64>,
    pub qty: Option<i64>,
}

fn local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&date.and_time(time)).earliest()
}

fn day_start(at: DateTime<Tz>) -> DateTime<Tz> {
    local(at.timezone(), at.date_naive(), NaiveTime::MIN).unwrap_or(at)
}

fn day_end(at: DateTime<Tz>) -> DateTime<Tz> {
    let end = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    local(at.timezone(), at.date_naive(), end).unwrap_or(at)
}

/// Resolve a relative time phrase to an inclusive `(start, end)` pair of
/// ISO-8601 timestamps in the zone of `now`.
///
/// Recognized (case-insensitive): today, yesterday, last/past week,
/// last/past 30 days, this month, and calendar-quarter tokens `q1`..`q4`.
/// Anything else defaults to the last 7 days ending now.
pub fn normalize_time(text: &str, now: DateTime<Tz>) -> (String, String) {
    let lower = text.to_lowercase();
    let tz = now.timezone();

    if lower.contains("today") {
        return (day_start(now).to_rfc3339(), now.to_rfc3339());
    }
    if lower.contains("yesterday") {
        let y = now - Duration::days(1);
        return (day_start(y).to_rfc3339(), day_end(y).to_rfc3339());
    }
    if lower.contains("last week") || lower.contains("past week") {
        let start = day_start(now - Duration::days(7));
        return (start.to_rfc3339(), now.to_rfc3339());
    }
    if lower.contains("last 30 days")
        || lower.contains("last thirty days")
        || lower.contains("past 30 days")
    {
        let start = day_start(now - Duration::days(30));
        return (start.to_rfc3339(), now.to_rfc3339());
    }
    if lower.contains("this month") {
        let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
            .and_then(|d| local(tz, d, NaiveTime::MIN));
        if let Some(first) = first {
            return (first.to_rfc3339(), now.to_rfc3339());
        }
    }

    // Calendar quarter tokens: a 'q' directly followed by 1..4.
    if let Some(q) = find_quarter_token(&lower) {
        let start_month = (q - 1) * 3 + 1;
        let start = NaiveDate::from_ymd_opt(now.year(), start_month, 1)
            .and_then(|d| local(tz, d, NaiveTime::MIN));
        let next_quarter_start = if start_month + 3 > 12 {
            NaiveDate::from_ymd_opt(now.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(now.year(), start_month + 3, 1)
        }
        .and_then(|d| local(tz, d, NaiveTime::MIN));
        if let (Some(start), Some(next)) = (start, next_quarter_start) {
            return (start.to_rfc3339(), (next - Duration::seconds(1)).to_rfc3339());
        }
    }

    // Default: trailing 7 days ending now.
    ((now - Duration::days(7)).to_rfc3339(), now.to_rfc3339())
}

fn find_quarter_token(lower: &str) -> Option<u32> {
    let bytes = lower.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'q' {
            if let Some(&d) = bytes.get(i + 1) {
                if (b'1'..=b'4').contains(&d) {
                    return Some((d - b'0') as u32);
                }
            }
        }
    }
    None
}

/// Extract `<number><unit>` mentions. Units: `%`/`percent` (divided by
/// 100), `day`/`days`, `pcs`/`units` (quantity). Later mentions of the
/// same unit overwrite earlier ones.
pub fn parse_numbers_units(text: &str) -> NumberUnits {
    let lower = text.to_lowercase();
    let bytes = lower.as_bytes();
    let mut out = NumberUnits { percent: None, days: None, qty: None };

    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let num_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
        let num: f64 = match lower[num_start..i].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };

        // At most one whitespace character between number and unit.
        let mut unit_at = i;
        if unit_at < bytes.len() && (bytes[unit_at] as char).is_whitespace() {
            unit_at += 1;
        }
        let rest = &lower[unit_at.min(lower.len())..];
        let matched = if rest.starts_with('%') {
            out.percent = Some(num / 100.0);
            1
        } else if rest.starts_with("percent") {
            out.percent = Some(num / 100.0);
            "percent".len()
        } else if rest.starts_with("days") {
            out.days = Some(num as i64);
            "days".len()
        } else if rest.starts_with("day") {
            out.days = Some(num as i64);
            "day".len()
        } else if rest.starts_with("pcs") {
            out.qty = Some(num as i64);
            "pcs".len()
        } else if rest.starts_with("units") {
            out.qty = Some(num as i64);
            "units".len()
        } else {
            0
        };
        if matched > 0 {
            i = unit_at + matched;
        }
    }
    out
}

impl NumberUnits {
    pub fn to_map(&self) -> HashMap<&'static str, serde_json::Value> {
        let mut m = HashMap::new();
        if let Some(p) = self.percent {
            m.insert("percent", serde_json::json!(p));
        }
        if let Some(d) = self.days {
            m.insert("days", serde_json::json!(d));
        }
        if let Some(q) = self.qty {
            m.insert("qty", serde_json::json!(q));
        }
        m
    }
}

/// Resolve SKU aliases mentioned in the text, in order of appearance,
/// deduplicated preserving order.
pub fn resolve_skus(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut hits: Vec<(usize, &str)> = Vec::new();
    for (alias, _) in SKU_ALIASES {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(alias) {
            hits.push((from + pos, alias));
            from += pos + alias.len();
        }
    }
    hits.sort_by_key(|(pos, _)| *pos);

    let mut out: Vec<String> = Vec::new();
    for (_, alias) in hits {
        if let Some((_, skus)) = SKU_ALIASES.iter().find(|(a, _)| a == &alias) {
            for sku in *skus {
                if !out.iter().any(|s| s == sku) {
                    out.push(sku.to_string());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn frozen_now() -> DateTime<Tz> {
        chrono_tz::Asia::Singapore
            .with_ymd_and_hms(2025, 6, 15, 14, 30, 0)
            .unwrap()
    }

    #[test]
    fn last_week_is_deterministic() {
        let now = frozen_now();
        let a = normalize_time("show me last 7 days please", now);
        let b = normalize_time("show me last 7 days please", now);
        assert_eq!(a, b);
    }

    #[test]
    fn today_starts_at_midnight() {
        let (start, end) = normalize_time("today's sales", frozen_now());
        assert!(start.starts_with("2025-06-15T00:00:00"));
        assert!(end.starts_with("2025-06-15T14:30:00"));
    }

    #[test]
    fn quarter_token_spans_calendar_quarter() {
        let (start, end) = normalize_time("revenue for Q2", frozen_now());
        assert!(start.starts_with("2025-04-01T00:00:00"));
        assert!(end.starts_with("2025-06-30T23:59:59"));
    }

    #[test]
    fn default_is_trailing_seven_days() {
        let now = frozen_now();
        let (start, _) = normalize_time("anything else", now);
        let parsed: DateTime<chrono::FixedOffset> = start.parse().unwrap();
        assert_eq!((now.naive_utc() - parsed.naive_utc()).num_days(), 7);
        assert_eq!(parsed.hour(), now.hour());
    }

    #[test]
    fn numbers_and_units() {
        let r = parse_numbers_units("in 30 days reorder 50 units");
        assert_eq!(r.days, Some(30));
        assert_eq!(r.qty, Some(50));
        assert_eq!(r.percent, None);
    }

    #[test]
    fn percent_is_scaled() {
        let r = parse_numbers_units("margin above 12.5% please");
        assert_eq!(r.percent, Some(0.125));
    }

    #[test]
    fn sku_aliases_ordered_and_deduped() {
        let skus = resolve_skus("compare MacBook against iPhone and macbook again");
        assert_eq!(skus, vec!["APPL-MBP-001", "APPL-MBA-001", "APPL-IPH-001"]);
    }
}
