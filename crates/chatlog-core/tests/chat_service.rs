use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chatlog_core::{ChatConfig, ChatError, ChatService};
use chatlog_provider::{LlmProvider, LlmRequest, LlmResponse, StubProvider, Usage};
use chatlog_schema::{EventType, Role};
use chatlog_store::ConversationStore;

struct FixedUsageProvider {
    reply: String,
    total: u32,
}

#[async_trait]
impl LlmProvider for FixedUsageProvider {
    async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Ok(LlmResponse {
            text: self.reply.clone(),
            usage: Some(Usage {
                prompt_tokens: 0,
                completion_tokens: self.total,
                total_tokens: self.total,
            }),
            stop_reason: Some("end_turn".into()),
        })
    }
}

#[derive(Default)]
struct RecordingProvider {
    requests: Mutex<Vec<LlmRequest>>,
}

#[async_trait]
impl LlmProvider for RecordingProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        Ok(LlmResponse {
            text: format!("answer {n}"),
            usage: None,
            stop_reason: None,
        })
    }
}

struct FailProvider;

#[async_trait]
impl LlmProvider for FailProvider {
    async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Err(anyhow!("openai api error (503 Service Unavailable) [retryable]"))
    }
}

fn service(provider: Arc<dyn LlmProvider>, settings: ChatConfig) -> ChatService {
    ChatService::new(
        ConversationStore::open_in_memory().unwrap(),
        provider,
        settings,
    )
}

#[tokio::test]
async fn totals_accumulate_across_turns() {
    let svc = service(
        Arc::new(FixedUsageProvider {
            reply: "hello".into(),
            total: 12,
        }),
        ChatConfig::default(),
    );

    let first = svc.turn("hi", Some("s1".into())).await.unwrap();
    assert_eq!(first.stream_id, "s1");
    assert_eq!(first.reply, "hello");
    assert_eq!(first.total_tokens, 12);

    let second = svc.turn("again", Some("s1".into())).await.unwrap();
    assert_eq!(second.total_tokens, 24);

    let state = svc.state("s1").await.unwrap().unwrap();
    assert_eq!(state.history.len(), 4);
    assert_eq!(state.last_question.as_deref(), Some("again"));
    assert_eq!(state.last_answer.as_deref(), Some("hello"));
    assert_eq!(state.total_tokens, 24);
}

#[tokio::test]
async fn prompt_contains_system_prompt_and_full_history() {
    let provider = Arc::new(RecordingProvider::default());
    let settings = ChatConfig {
        system_prompt: "Answer tersely.".into(),
        max_tokens: Some(256),
        ..ChatConfig::default()
    };
    let svc = service(provider.clone(), settings);

    svc.turn("first", Some("s".into())).await.unwrap();
    svc.turn("second", Some("s".into())).await.unwrap();

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);

    let last = &requests[1];
    assert_eq!(last.model, "gpt-4o");
    assert_eq!(last.system.as_deref(), Some("Answer tersely."));
    assert_eq!(last.max_tokens, Some(256));
    let contents: Vec<(&str, &str)> = last
        .messages
        .iter()
        .map(|m| (m.role.as_str(), m.content.as_str()))
        .collect();
    assert_eq!(
        contents,
        vec![
            ("user", "first"),
            ("assistant", "answer 1"),
            ("user", "second"),
        ]
    );
}

#[tokio::test]
async fn response_without_usage_counts_zero_tokens() {
    let svc = service(Arc::new(RecordingProvider::default()), ChatConfig::default());
    let outcome = svc.turn("hi", Some("s".into())).await.unwrap();
    assert_eq!(outcome.total_tokens, 0);
    assert!(outcome.usage.is_none());

    let events = svc.events("s").await.unwrap();
    assert_eq!(events[1].meta, serde_json::json!({}));
}

#[tokio::test]
async fn blank_message_is_rejected_without_writes() {
    let svc = service(Arc::new(StubProvider), ChatConfig::default());

    for message in ["", "   ", "\n\t"] {
        let err = svc.turn(message, Some("s".into())).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Message is required");
    }

    assert!(svc.events("s").await.unwrap().is_empty());
    assert!(svc.state("s").await.unwrap().is_none());
}

#[tokio::test]
async fn provider_failure_keeps_user_query() {
    let svc = service(Arc::new(FailProvider), ChatConfig::default());

    let err = svc.turn("hi", Some("s".into())).await.unwrap_err();
    assert!(matches!(err, ChatError::Provider(_)));
    assert!(err.to_string().contains("503"));

    let events = svc.events("s").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::UserQuery);

    let state = svc.state("s").await.unwrap().unwrap();
    assert_eq!(state.last_question.as_deref(), Some("hi"));
    assert!(state.last_answer.is_none());
    assert_eq!(state.history.len(), 1);
}

#[tokio::test]
async fn provider_failure_recorded_when_enabled() {
    let settings = ChatConfig {
        record_failures: true,
        ..ChatConfig::default()
    };
    let svc = service(Arc::new(FailProvider), settings);

    svc.turn("hi", Some("s".into())).await.unwrap_err();

    let events = svc.events("s").await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, EventType::SystemError);
    assert!(events[1].payload["message"]
        .as_str()
        .unwrap()
        .contains("503"));

    let state = svc.state("s").await.unwrap().unwrap();
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].role, Role::User);
    assert_eq!(state.total_tokens, 0);
}

#[tokio::test]
async fn missing_stream_id_generates_uuid() {
    let svc = service(Arc::new(StubProvider), ChatConfig::default());

    let a = svc.turn("hi", None).await.unwrap();
    let b = svc.turn("hi", Some(String::new())).await.unwrap();

    assert!(uuid::Uuid::parse_str(&a.stream_id).is_ok());
    assert!(uuid::Uuid::parse_str(&b.stream_id).is_ok());
    assert_ne!(a.stream_id, b.stream_id);
    assert_eq!(svc.events(&a.stream_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn streams_are_isolated() {
    let svc = service(
        Arc::new(FixedUsageProvider {
            reply: "ok".into(),
            total: 5,
        }),
        ChatConfig::default(),
    );

    svc.turn("one", Some("a".into())).await.unwrap();
    svc.turn("two", Some("b".into())).await.unwrap();
    svc.turn("three", Some("a".into())).await.unwrap();

    assert_eq!(svc.state("a").await.unwrap().unwrap().total_tokens, 10);
    assert_eq!(svc.state("b").await.unwrap().unwrap().total_tokens, 5);
    assert_eq!(svc.state("b").await.unwrap().unwrap().history.len(), 2);
}

#[tokio::test]
async fn file_backed_service_survives_restart() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db_path = tmp.path().join("data/chatlog.db");

    {
        let svc = ChatService::new(
            ConversationStore::open(&db_path).unwrap(),
            Arc::new(StubProvider),
            ChatConfig::default(),
        );
        svc.turn("persist me", Some("s".into())).await.unwrap();
    }

    let svc = ChatService::new(
        ConversationStore::open(&db_path).unwrap(),
        Arc::new(StubProvider),
        ChatConfig::default(),
    );
    let state = svc.state("s").await.unwrap().unwrap();
    assert_eq!(state.last_question.as_deref(), Some("persist me"));
    assert_eq!(state.history.len(), 2);
}
