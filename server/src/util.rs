use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use sha2::{Digest, Sha256};

pub fn now_fixed() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

pub fn lookback_date(days: i64) -> NaiveDate {
    (Utc::now() - Duration::days(days.max(0))).date_naive()
}

/// Accepts the Gmail search form (`2025/08/01`) as well as ISO dates.
pub fn parse_cursor_date(raw: &str) -> anyhow::Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|e| anyhow::anyhow!("Invalid date '{}': {}", raw, e))
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
