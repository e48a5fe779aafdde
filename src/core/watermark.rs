use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parses an ISO-ish instant. Values without an offset are taken as UTC.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Lower bound for report rows; inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    start: DateTime<Utc>,
}

impl Watermark {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { start }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn admits(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start
    }
}
