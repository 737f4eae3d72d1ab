//! Conversation read model, one row per stream.
//!
//! The row is updated with a single upsert that appends to the stored JSON
//! history and increments the token counter inside SQLite, so no
//! read-modify-write happens in Rust and concurrent appends cannot drop a
//! contribution. Token counts are non-negative and the total saturates at
//! `i64::MAX`, matching `ConversationState::apply`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use chatlog_schema::{ConversationState, EventType, HistoryEntry, ProjectionDelta, Role};

use crate::error::StoreError;
use crate::events::{format_timestamp, parse_timestamp};

/// Fold one event into its stream's projection.
///
/// Returns `false` when the event type does not affect the read model.
pub fn project(
    conn: &Connection,
    stream_id: &str,
    event_type: &EventType,
    payload: &Value,
    meta: &Value,
    at: &DateTime<Utc>,
) -> Result<bool, StoreError> {
    let Some(delta) = ProjectionDelta::from_event(event_type, payload, meta) else {
        tracing::debug!(stream_id, %event_type, "event not projected");
        return Ok(false);
    };

    let (question, answer) = match delta.role {
        Role::User => (Some(delta.content.as_str()), None),
        Role::Assistant => (None, Some(delta.content.as_str())),
    };
    let entry = serde_json::to_string(&delta.entry())?;

    conn.execute(
        r#"INSERT INTO conversation_states
               (stream_id, last_question, last_answer, history, total_tokens, updated_at)
           VALUES (?1, ?2, ?3, json_array(json(?4)), ?5, ?6)
           ON CONFLICT(stream_id) DO UPDATE SET
               last_question = COALESCE(excluded.last_question, conversation_states.last_question),
               last_answer = COALESCE(excluded.last_answer, conversation_states.last_answer),
               history = json_insert(conversation_states.history, '$[#]', json(?4)),
               total_tokens = CASE
                   WHEN excluded.total_tokens > 9223372036854775807 - conversation_states.total_tokens
                       THEN 9223372036854775807
                   ELSE conversation_states.total_tokens + excluded.total_tokens
               END,
               updated_at = excluded.updated_at"#,
        params![
            stream_id,
            question,
            answer,
            entry,
            delta.tokens,
            format_timestamp(at),
        ],
    )?;

    Ok(true)
}

/// Current projection for a stream, or `None` if nothing has been projected.
pub fn load(conn: &Connection, stream_id: &str) -> Result<Option<ConversationState>, StoreError> {
    let row = conn
        .query_row(
            r#"SELECT stream_id, last_question, last_answer, history, total_tokens, updated_at
               FROM conversation_states
               WHERE stream_id = ?1"#,
            [stream_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((stream_id, last_question, last_answer, history, total_tokens, updated_at)) = row
    else {
        return Ok(None);
    };

    let history: Vec<HistoryEntry> =
        serde_json::from_str(&history).map_err(|e| StoreError::CorruptRow {
            table: "conversation_states",
            column: "history",
            detail: format!("invalid history: {e}"),
        })?;

    Ok(Some(ConversationState {
        stream_id,
        last_question,
        last_answer,
        history,
        total_tokens,
        updated_at: parse_timestamp(&updated_at, "conversation_states", "updated_at")?,
    }))
}
