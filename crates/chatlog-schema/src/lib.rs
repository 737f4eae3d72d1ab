pub mod state;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use state::{ConversationState, HistoryEntry, ProjectionDelta, Role};

/// Tag of a stored event. Tags outside the known set are kept verbatim so
/// they survive a round trip through the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventType {
    UserQuery,
    AiResponse,
    SystemError,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::UserQuery => "USER_QUERY",
            Self::AiResponse => "AI_RESPONSE",
            Self::SystemError => "SYSTEM_ERROR",
            Self::Other(tag) => tag.as_str(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "USER_QUERY" => Self::UserQuery,
            "AI_RESPONSE" => Self::AiResponse,
            "SYSTEM_ERROR" => Self::SystemError,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

/// One immutable row of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: Uuid,
    pub stream_id: String,
    /// Position within the stream, starting at 0.
    pub sequence: i64,
    pub event_type: EventType,
    pub payload: Value,
    #[serde(default = "empty_meta")]
    pub meta: Value,
    pub created_at: DateTime<Utc>,
}

/// Event to be appended. The store assigns id, sequence and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub stream_id: String,
    pub event_type: EventType,
    pub payload: Value,
    pub meta: Value,
}

impl NewEvent {
    pub fn new(stream_id: impl Into<String>, event_type: EventType, payload: Value) -> Self {
        Self {
            stream_id: stream_id.into(),
            event_type,
            payload,
            meta: empty_meta(),
        }
    }

    pub fn user_query(stream_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            stream_id,
            EventType::UserQuery,
            serde_json::json!({ "content": content.into() }),
        )
    }

    pub fn ai_response(
        stream_id: impl Into<String>,
        content: impl Into<String>,
        meta: Value,
    ) -> Self {
        Self::new(
            stream_id,
            EventType::AiResponse,
            serde_json::json!({ "content": content.into() }),
        )
        .with_meta(meta)
    }

    pub fn system_error(stream_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            stream_id,
            EventType::SystemError,
            serde_json::json!({ "message": message.into() }),
        )
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = if meta.is_null() { empty_meta() } else { meta };
        self
    }
}

pub fn empty_meta() -> Value {
    Value::Object(Default::default())
}

/// Token count carried by event metadata.
///
/// Two shapes are accepted: a flat `{"total_tokens": n}` and the provider
/// usage block nested as `{"usage": {"total_tokens": n}}`. The flat field
/// wins when both are present. A count must be a non-negative whole number
/// (`12` or `12.0`); anything else counts as zero.
pub fn token_count(meta: &Value) -> i64 {
    meta.get("total_tokens")
        .and_then(whole_count)
        .or_else(|| {
            meta.get("usage")
                .and_then(|usage| usage.get("total_tokens"))
                .and_then(whole_count)
        })
        .unwrap_or(0)
}

fn whole_count(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return (n >= 0).then_some(n);
    }
    // Floats and integers above i64::MAX; `as` saturates.
    let f = value.as_f64()?;
    (f >= 0.0 && f.fract() == 0.0).then_some(f as i64)
}
