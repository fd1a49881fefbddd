use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured event record bound for the collection endpoint.
///
/// This is the canonical representation of an event throughout the pipeline,
/// from the public API through transport and the retry cache. The `data` field
/// is an opaque JSON value; the library serializes it but never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub category: String,
    pub subcategory: String,
    pub level: String,
    /// UTC, `YYYY-MM-DD HH:MM:SS`. See [`crate::client::payload`] for normalization.
    pub timestamp: String,
    pub data: Value,
}

impl LogEvent {
    pub fn new(
        event_type: impl Into<String>,
        category: impl Into<String>,
        subcategory: impl Into<String>,
        level: impl Into<String>,
        timestamp: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            category: category.into(),
            subcategory: subcategory.into(),
            level: level.into(),
            timestamp: timestamp.into(),
            data,
        }
    }
}
