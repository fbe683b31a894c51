use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Earliest timestamp a record can carry; stands in for missing or unparsable
/// required timestamps.
pub fn timestamp_floor() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(chrono::NaiveTime::MIN)
}

/// Parses ISO-8601 text into a naive UTC timestamp.
///
/// Accepts RFC 3339 with an offset (converted to UTC), naive date-times with
/// either `T` or a space between date and time, and bare dates.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
}

pub struct Ticker {
    begin: NaiveDateTime,
}

impl Ticker {
    pub fn new() -> Ticker {
        Ticker { begin: now() }
    }

    pub fn elapsed(&self, msg: impl AsRef<str>) {
        let elapsed = now() - self.begin;
        info!(
            "Elapsed {} s {}",
            elapsed.num_milliseconds() as f64 / 1000.0,
            msg.as_ref()
        )
    }
}
