//! Event envelope: what gets matched against event triggers by topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key used when raw event data is not a JSON object.
pub const RAW_DATA_KEY: &str = "raw";

/// An occurrence emitted into the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub id: String,
    pub name: String,
    pub source: String,
    pub data_type: String,
    /// Raw data as received.
    pub data: String,
    /// Structured view of `data`.
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event, parsing `data` into the structured payload.
    pub fn new(topic: &str, data: &str) -> Self {
        Self {
            topic: topic.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            name: String::new(),
            source: String::new(),
            data_type: String::new(),
            data: data.to_string(),
            payload: parse_payload(data),
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_data_type(mut self, data_type: &str) -> Self {
        self.data_type = data_type.to_string();
        self
    }

    /// The full envelope as a JSON string.
    pub fn envelope_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("⚠️ Failed to serialize event {}: {e}", self.id);
            String::new()
        })
    }
}

/// Parse raw event data. A JSON object is kept as-is; anything else is wrapped
/// as `{"raw": data}` so it is never discarded.
pub fn parse_payload(data: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert(RAW_DATA_KEY.to_string(), Value::String(data.to_string()));
            map
        }
    }
}
