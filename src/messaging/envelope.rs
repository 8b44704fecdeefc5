//! # Event Envelope
//!
//! Wire format of every message on the bus:
//!
//! ```json
//! {"event_type": "video.downloaded",
//!  "data": {"task_id": "t1", "user_id": "u1"},
//!  "timestamp": 1717171717,
//!  "message_id": "6f1c0b9e-..."}
//! ```
//!
//! Envelopes are immutable once published. `message_id` is for tracing
//! only; nothing deduplicates on it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::MessagingError;

/// Event payload: a JSON object
pub type EventData = Map<String, Value>;

pub const TASK_ID_FIELD: &str = "task_id";
pub const USER_ID_FIELD: &str = "user_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    #[serde(default)]
    pub data: EventData,
    pub timestamp: i64,
    pub message_id: String,
}

impl EventEnvelope {
    /// Wrap a payload with a fresh message id and the current unix time
    pub fn new(event_type: impl Into<String>, data: EventData) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now().timestamp(),
            message_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes).map_err(|e| MessagingError::deserialization(e.to_string()))
    }

    /// Non-empty string field of the payload
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data
            .get(field)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn task_id(&self) -> Option<&str> {
        self.data_str(TASK_ID_FIELD)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.data_str(USER_ID_FIELD)
    }

    /// `task_id` for log lines
    pub fn task_id_or_unknown(&self) -> &str {
        self.task_id().unwrap_or("unknown")
    }
}

/// Build a payload carrying the two identity fields
pub fn task_data(task_id: &str, user_id: &str) -> EventData {
    let mut data = EventData::new();
    data.insert(TASK_ID_FIELD.to_string(), Value::from(task_id));
    data.insert(USER_ID_FIELD.to_string(), Value::from(user_id));
    data
}
