//! Persisted records: schedules that back triggers, and the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::event::{Event, parse_payload};

/// Persisted target/params/enabled-state for a trigger, editable without
/// touching the workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub workflow_name: String,
    pub trigger_name: String,
    pub is_enabled: bool,
    pub target: String,
    /// Arbitrary JSON values; only strings reach a run (see [`decode_string_params`]).
    pub params: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Create an enabled schedule with a generated ID.
    pub fn new(workflow_name: &str, trigger_name: &str, target: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("sched-{}", uuid::Uuid::new_v4().simple()),
            workflow_name: workflow_name.to_string(),
            trigger_name: trigger_name.to_string(),
            is_enabled: true,
            target: target.to_string(),
            params: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// String-valued params only.
    pub fn string_params(&self) -> BTreeMap<String, String> {
        decode_string_params(&self.params)
    }
}

/// Decode boundary for schedule params: keep strings, drop everything else.
/// Numbers, bools, arrays, objects and nulls are never coerced.
pub fn decode_string_params(params: &Map<String, Value>) -> BTreeMap<String, String> {
    params
        .iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            _ => {
                tracing::debug!("Dropping non-string schedule param '{k}'");
                None
            }
        })
        .collect()
}

/// One persisted event awaiting (or past) processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogRow {
    pub id: i64,
    pub topic: String,
    pub event_id: String,
    pub name: String,
    pub source: String,
    pub data_type: String,
    pub data: String,
    pub processed: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl EventLogRow {
    /// Rebuild the event envelope this row was persisted from.
    pub fn to_event(&self) -> Event {
        Event {
            topic: self.topic.clone(),
            id: self.event_id.clone(),
            name: self.name.clone(),
            source: self.source.clone(),
            data_type: self.data_type.clone(),
            data: self.data.clone(),
            payload: parse_payload(&self.data),
            timestamp: self.created_at,
        }
    }
}
