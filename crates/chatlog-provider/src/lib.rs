pub mod openai;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiProvider;
pub use types::*;

pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
}

// ============================================================
// Provider Configuration
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI or any endpoint speaking the chat completions API
    OpenAI,
    /// Offline echo provider
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Custom base URL; defaults to the public OpenAI endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            api_key: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Build the provider once at startup; callers share the returned handle.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider_type {
        ProviderType::OpenAI => {
            let key = config
                .api_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| anyhow!("openai requires api_key"))?;
            let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE);
            Arc::new(OpenAiProvider::with_timeout(
                key,
                base_url,
                Duration::from_secs(config.timeout_secs),
            ))
        }
        ProviderType::Stub => Arc::new(StubProvider),
    };
    tracing::info!("Created provider: {:?}", config.provider_type);
    Ok(provider)
}

/// Echoes the last message back with a deterministic word-count usage.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let user_text = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let text = format!("[stub:{}] {}", request.model, user_text);

        let prompt_words = request
            .system
            .iter()
            .map(String::as_str)
            .chain(request.messages.iter().map(|m| m.content.as_str()))
            .map(|s| s.split_whitespace().count())
            .sum::<usize>();
        let completion_words = text.split_whitespace().count();

        Ok(LlmResponse {
            text,
            usage: Some(Usage::new(prompt_words as u32, completion_words as u32)),
            stop_reason: Some("end_turn".into()),
        })
    }
}
