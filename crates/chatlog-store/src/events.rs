//! Append-only event log.
//!
//! Rows are never updated or deleted. Each stream gets its own gap-free
//! sequence, assigned from the current maximum inside the caller's
//! transaction, so writers must hold the connection for the whole append.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use chatlog_schema::{EventRecord, NewEvent};

use crate::error::StoreError;

/// Insert a new event and return the stored record.
pub fn append(conn: &Connection, event: &NewEvent) -> Result<EventRecord, StoreError> {
    if event.stream_id.trim().is_empty() {
        return Err(StoreError::InvalidInput("stream id must not be empty".into()));
    }

    let sequence: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), -1) + 1 FROM events WHERE stream_id = ?1",
        [&event.stream_id],
        |row| row.get(0),
    )?;

    let id = Uuid::new_v4();
    // Stored with microsecond precision; truncate so the returned record matches a re-read.
    let created_at = Utc::now().trunc_subsecs(6);

    conn.execute(
        r#"INSERT INTO events (id, stream_id, sequence, event_type, payload, meta, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            id.to_string(),
            event.stream_id,
            sequence,
            event.event_type.as_str(),
            serde_json::to_string(&event.payload)?,
            serde_json::to_string(&event.meta)?,
            format_timestamp(&created_at),
        ],
    )?;

    Ok(EventRecord {
        id,
        stream_id: event.stream_id.clone(),
        sequence,
        event_type: event.event_type.clone(),
        payload: event.payload.clone(),
        meta: event.meta.clone(),
        created_at,
    })
}

/// All events of a stream in sequence order.
pub fn list(conn: &Connection, stream_id: &str) -> Result<Vec<EventRecord>, StoreError> {
    let mut stmt = conn.prepare(
        r#"SELECT id, stream_id, sequence, event_type, payload, meta, created_at
           FROM events
           WHERE stream_id = ?1
           ORDER BY sequence ASC"#,
    )?;
    let mut rows = stmt.query([stream_id])?;

    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        events.push(row_to_event(row)?);
    }
    Ok(events)
}

fn row_to_event(row: &Row<'_>) -> Result<EventRecord, StoreError> {
    let id: String = row.get(0)?;
    let event_type: String = row.get(3)?;
    let payload: String = row.get(4)?;
    let meta: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(EventRecord {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::CorruptRow {
            table: "events",
            column: "id",
            detail: e.to_string(),
        })?,
        stream_id: row.get(1)?,
        sequence: row.get(2)?,
        event_type: event_type.into(),
        payload: parse_json(&payload, "events", "payload")?,
        meta: parse_json(&meta, "events", "meta")?,
        created_at: parse_timestamp(&created_at, "events", "created_at")?,
    })
}

pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp: {e}"),
        })
}

pub(crate) fn parse_json(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}
