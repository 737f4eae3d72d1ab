use std::path::Path;

use chatlog_schema::{ConversationState, EventRecord, NewEvent};

use crate::database::Database;
use crate::error::StoreError;
use crate::{events, projection};

/// Write side and read side of the conversation log behind one handle.
///
/// `append` records the event and folds it into the projection in a single
/// transaction: if the insert fails nothing is projected, and if the
/// projection fails the event is rolled back.
#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub async fn append(&self, event: NewEvent) -> Result<EventRecord, StoreError> {
        let record = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let record = events::append(&tx, &event)?;
                projection::project(
                    &tx,
                    &record.stream_id,
                    &record.event_type,
                    &record.payload,
                    &record.meta,
                    &record.created_at,
                )?;
                tx.commit()?;
                Ok(record)
            })
            .await?;

        tracing::debug!(
            stream_id = %record.stream_id,
            event_type = %record.event_type,
            sequence = record.sequence,
            "event appended"
        );
        Ok(record)
    }

    /// Projection for a stream; `None` when the stream is unknown.
    pub async fn state(&self, stream_id: &str) -> Result<Option<ConversationState>, StoreError> {
        let stream_id = stream_id.to_string();
        self.db
            .call(move |conn| projection::load(conn, &stream_id))
            .await
    }

    pub async fn events(&self, stream_id: &str) -> Result<Vec<EventRecord>, StoreError> {
        let stream_id = stream_id.to_string();
        self.db.call(move |conn| events::list(conn, &stream_id)).await
    }
}
