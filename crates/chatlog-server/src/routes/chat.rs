use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::post,
    Json, Router,
};
use chatlog_core::TurnOutcome;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    #[serde(rename = "streamId")]
    pub stream_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/chat", post(post_chat).get(get_state))
}

/// `{message, streamId?}`; anything that is not a non-empty string message is a 400.
pub async fn post_chat(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            tracing::debug!("rejected chat body: {rejection}");
            Value::Null
        }
    };

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Message is required".into()))?;
    let stream_id = body
        .get("streamId")
        .and_then(Value::as_str)
        .map(str::to_string);

    let outcome = state.chat.turn(message, stream_id).await?;
    Ok(Json(outcome))
}

pub async fn get_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<Value>, ApiError> {
    let stream_id = query
        .stream_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("streamId is required".into()))?;

    let body = match state.chat.state(&stream_id).await? {
        Some(conversation) => serde_json::to_value(conversation)
            .map_err(|e| ApiError::Internal(format!("failed to encode state: {e}")))?,
        None => serde_json::json!({ "history": [], "totalTokens": 0 }),
    };
    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chatlog_core::{ChatConfig, ChatService};
    use chatlog_provider::{LlmProvider, LlmRequest, LlmResponse, StubProvider, Usage};
    use chatlog_store::ConversationStore;
    use tower::ServiceExt;

    use super::router;
    use crate::state::AppState;

    struct TwelveTokens;

    #[async_trait]
    impl LlmProvider for TwelveTokens {
        async fn chat(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse {
                text: "hello".into(),
                usage: Some(Usage::new(4, 8)),
                stop_reason: None,
            })
        }
    }

    struct Unreachable;

    #[async_trait]
    impl LlmProvider for Unreachable {
        async fn chat(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            Err(anyhow!("openai api error (connect) [retryable]: secret upstream detail"))
        }
    }

    fn app(provider: Arc<dyn LlmProvider>) -> axum::Router {
        let service = ChatService::new(
            ConversationStore::open_in_memory().unwrap(),
            provider,
            ChatConfig::default(),
        );
        router().with_state(AppState::new(service))
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn post_then_get_returns_projection() {
        let app = app(Arc::new(TwelveTokens));

        let response = app
            .clone()
            .oneshot(post_json(r#"{"message":"hi","streamId":"s1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["streamId"], "s1");
        assert_eq!(body["reply"], "hello");
        assert_eq!(body["totalTokens"], 12);
        assert_eq!(body["usage"]["total_tokens"], 12);

        let response = app.oneshot(get("/chat?streamId=s1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["streamId"], "s1");
        assert_eq!(body["lastQuestion"], "hi");
        assert_eq!(body["lastAnswer"], "hello");
        assert_eq!(body["totalTokens"], 12);
        assert_eq!(
            body["history"],
            serde_json::json!([
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ])
        );
    }

    #[tokio::test]
    async fn post_without_stream_id_assigns_one() {
        let app = app(Arc::new(StubProvider));
        let response = app.oneshot(post_json(r#"{"message":"hi"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(!body["streamId"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_rejects_missing_or_empty_message() {
        let app = app(Arc::new(StubProvider));

        for body in [r#"{}"#, r#"{"message":""}"#, r#"{"message":42}"#, "not json"] {
            let response = app.clone().oneshot(post_json(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(
                body_json(response).await,
                serde_json::json!({"error": "Message is required"})
            );
        }

        let response = app.oneshot(get("/chat?streamId=")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn provider_failure_is_opaque_500() {
        let app = app(Arc::new(Unreachable));

        let response = app
            .clone()
            .oneshot(post_json(r#"{"message":"hi","streamId":"s"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Internal Server Error"})
        );

        let response = app.oneshot(get("/chat?streamId=s")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["lastQuestion"], "hi");
        assert!(body["lastAnswer"].is_null());
    }

    #[tokio::test]
    async fn get_unknown_stream_returns_default_shape() {
        let app = app(Arc::new(StubProvider));
        let response = app.oneshot(get("/chat?streamId=nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"history": [], "totalTokens": 0})
        );
    }

    #[tokio::test]
    async fn get_without_stream_id_is_400() {
        let app = app(Arc::new(StubProvider));
        let response = app.oneshot(get("/chat")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "streamId is required"})
        );
    }
}
