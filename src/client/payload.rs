use crate::domain::LogEvent;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Caller-supplied timestamp for an event, in whichever shape is handy.
#[derive(Debug, Clone)]
pub enum Timestamp {
    /// Already formatted; passed through as given.
    Text(String),
    /// Seconds since the Unix epoch.
    EpochSecs(f64),
    DateTime(DateTime<Utc>),
}

impl From<&str> for Timestamp {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Timestamp {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for Timestamp {
    fn from(value: f64) -> Self {
        Self::EpochSecs(value)
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self::EpochSecs(value as f64)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

/// Normalizes to `YYYY-MM-DD HH:MM:SS` UTC. `None` means now; an unmappable
/// epoch value falls back to now rather than failing the caller.
pub fn normalize_timestamp(ts: Option<Timestamp>) -> String {
    match ts {
        None => Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        Some(Timestamp::Text(s)) => s,
        Some(Timestamp::DateTime(dt)) => dt.format(TIMESTAMP_FORMAT).to_string(),
        Some(Timestamp::EpochSecs(secs)) => {
            let millis = (secs * 1000.0) as i64;
            match Utc.timestamp_millis_opt(millis).single() {
                Some(dt) => dt.format(TIMESTAMP_FORMAT).to_string(),
                None => Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            }
        }
    }
}

/// Assembles the event envelope sent to the collection endpoint.
pub fn build_event(
    event_type: impl Into<String>,
    category: impl Into<String>,
    subcategory: impl Into<String>,
    level: impl Into<String>,
    data: Value,
    timestamp: Option<Timestamp>,
) -> LogEvent {
    LogEvent::new(
        event_type,
        category,
        subcategory,
        level,
        normalize_timestamp(timestamp),
        data,
    )
}
