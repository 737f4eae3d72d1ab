use std::sync::Arc;

use chatlog_provider::{LlmMessage, LlmProvider, LlmRequest, Usage};
use chatlog_schema::{ConversationState, EventRecord, NewEvent, Role};
use chatlog_store::ConversationStore;
use serde::Serialize;

use crate::config::ChatConfig;
use crate::error::ChatError;

/// Result of one request/response turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub stream_id: String,
    pub reply: String,
    pub total_tokens: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Runs a chat turn against the event log: record the question, ask the
/// provider with the projected history, record the answer.
pub struct ChatService {
    store: ConversationStore,
    provider: Arc<dyn LlmProvider>,
    settings: ChatConfig,
}

impl ChatService {
    pub fn new(
        store: ConversationStore,
        provider: Arc<dyn LlmProvider>,
        settings: ChatConfig,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    pub async fn turn(
        &self,
        message: &str,
        stream_id: Option<String>,
    ) -> Result<TurnOutcome, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::Validation("Message is required".into()));
        }

        let stream_id = stream_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.store
            .append(NewEvent::user_query(&stream_id, message))
            .await?;

        let messages = match self.store.state(&stream_id).await? {
            Some(state) => to_messages(&state),
            None => {
                tracing::warn!(stream_id = %stream_id, "projection missing after append");
                vec![LlmMessage::user(message)]
            }
        };

        let request = LlmRequest {
            model: self.settings.model.clone(),
            system: Some(self.settings.system_prompt.clone()),
            messages,
            max_tokens: self.settings.max_tokens,
        };

        let response = match self.provider.chat(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(stream_id = %stream_id, "provider call failed: {err:#}");
                if self.settings.record_failures {
                    let event = NewEvent::system_error(&stream_id, format!("{err:#}"));
                    if let Err(store_err) = self.store.append(event).await {
                        tracing::warn!(
                            stream_id = %stream_id,
                            "failed to record provider failure: {store_err}"
                        );
                    }
                }
                return Err(ChatError::Provider(err));
            }
        };

        let meta = match &response.usage {
            Some(usage) => serde_json::json!({ "usage": usage }),
            None => serde_json::json!({}),
        };
        self.store
            .append(NewEvent::ai_response(&stream_id, &response.text, meta))
            .await?;

        let total_tokens = self
            .store
            .state(&stream_id)
            .await?
            .map(|s| s.total_tokens)
            .unwrap_or_default();

        tracing::info!(stream_id = %stream_id, total_tokens, "turn completed");

        Ok(TurnOutcome {
            stream_id,
            reply: response.text,
            total_tokens,
            usage: response.usage,
        })
    }

    pub async fn state(&self, stream_id: &str) -> Result<Option<ConversationState>, ChatError> {
        Ok(self.store.state(stream_id).await?)
    }

    pub async fn events(&self, stream_id: &str) -> Result<Vec<EventRecord>, ChatError> {
        Ok(self.store.events(stream_id).await?)
    }
}

fn to_messages(state: &ConversationState) -> Vec<LlmMessage> {
    state
        .history
        .iter()
        .map(|entry| match entry.role {
            Role::User => LlmMessage::user(&entry.content),
            Role::Assistant => LlmMessage::assistant(&entry.content),
        })
        .collect()
}
