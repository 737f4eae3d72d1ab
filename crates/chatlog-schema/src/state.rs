//! Conversation read model and the fold step that derives it from events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{token_count, EventRecord, EventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// What a single event contributes to its stream's projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionDelta {
    pub role: Role,
    pub content: String,
    pub tokens: i64,
}

impl ProjectionDelta {
    /// Returns `None` for event types the projection ignores.
    pub fn from_event(event_type: &EventType, payload: &Value, meta: &Value) -> Option<Self> {
        // Classify by stored tag so `Other("USER_QUERY")` folds the same way
        // it will after a round trip through the store.
        let role = match EventType::from(event_type.as_str().to_string()) {
            EventType::UserQuery => Role::User,
            EventType::AiResponse => Role::Assistant,
            EventType::SystemError | EventType::Other(_) => return None,
        };
        let content = payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tokens = match role {
            Role::Assistant => token_count(meta),
            Role::User => 0,
        };
        Some(Self {
            role,
            content,
            tokens,
        })
    }

    pub fn entry(&self) -> HistoryEntry {
        HistoryEntry {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub stream_id: String,
    pub last_question: Option<String>,
    pub last_answer: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub total_tokens: i64,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(stream_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            stream_id: stream_id.into(),
            last_question: None,
            last_answer: None,
            history: Vec::new(),
            total_tokens: 0,
            updated_at: at,
        }
    }

    pub fn apply(&mut self, delta: &ProjectionDelta, at: DateTime<Utc>) {
        match delta.role {
            Role::User => self.last_question = Some(delta.content.clone()),
            Role::Assistant => self.last_answer = Some(delta.content.clone()),
        }
        self.history.push(delta.entry());
        self.total_tokens = self.total_tokens.saturating_add(delta.tokens);
        self.updated_at = at;
    }

    /// Folds a stream's events in sequence order. Returns `None` when no event
    /// in the slice touches the projection, mirroring a missing row.
    pub fn replay(stream_id: &str, events: &[EventRecord]) -> Option<Self> {
        let mut ordered: Vec<&EventRecord> = events
            .iter()
            .filter(|e| e.stream_id == stream_id)
            .collect();
        ordered.sort_by_key(|e| e.sequence);

        let mut state: Option<Self> = None;
        for event in ordered {
            let Some(delta) =
                ProjectionDelta::from_event(&event.event_type, &event.payload, &event.meta)
            else {
                continue;
            };
            state
                .get_or_insert_with(|| Self::new(stream_id, event.created_at))
                .apply(&delta, event.created_at);
        }
        state
    }
}
