//! Chat API types and handlers.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::inference::EngineError;
use crate::server::state::AppState;
use crate::types::generation::{GenerationRequest, Usage};
use crate::types::message::ChatMessage;

/// Seconds a client should wait before retrying after memory pressure
const RETRY_AFTER_SECS: &str = "5";

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
}

impl From<ChatRequest> for GenerationRequest {
    fn from(req: ChatRequest) -> Self {
        let mut request = GenerationRequest::messages(req.messages);
        request.max_tokens = req.max_tokens;
        request.temperature = req.temperature;
        request.top_p = req.top_p;
        request.top_k = req.top_k;
        request.repeat_penalty = req.repeat_penalty;
        request
    }
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

impl From<PromptRequest> for GenerationRequest {
    fn from(req: PromptRequest) -> Self {
        let mut request = GenerationRequest::prompt(req.prompt);
        request.max_tokens = req.max_tokens;
        request.temperature = req.temperature;
        request.top_p = req.top_p;
        request.top_k = req.top_k;
        request
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptResponse {
    pub text: String,
    pub usage: Usage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub detail: String,
}

/// Error returned by the chat handlers
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Engine(EngineError::ResourceExhausted(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Engine(err) if err.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (kind, detail) = match &self {
            ApiError::BadRequest(detail) => ("bad_request", detail.clone()),
            ApiError::Engine(err) => (err.kind(), err.to_string()),
        };
        if status.is_server_error() {
            tracing::warn!("Request failed ({}): {}", status, detail);
        }

        let body = Json(ErrorBody {
            kind: kind.to_string(),
            detail,
        });
        match self {
            ApiError::Engine(EngineError::ResourceExhausted(_)) => {
                (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS)], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }

    let result = state
        .manager
        .generate(req.into(), state.request_timeout)
        .await?;

    Ok(Json(ChatResponse {
        response: result.text,
    }))
}

pub async fn prompt_chat(
    State(state): State<AppState>,
    Json(req): Json<PromptRequest>,
) -> Result<Json<PromptResponse>, ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }

    let result = state
        .manager
        .generate(req.into(), state.request_timeout)
        .await?;

    Ok(Json(PromptResponse {
        text: result.text,
        usage: result.usage,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::generation::PromptInput;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (EngineError::Timeout(Duration::from_secs(1)), StatusCode::GATEWAY_TIMEOUT),
            (EngineError::NotReady, StatusCode::SERVICE_UNAVAILABLE),
            (
                EngineError::MissingArtifact { path: PathBuf::from("m.gguf") },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (EngineError::Download("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::ResourceExhausted("oom".into()), StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::FaultSuspected("segv".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (EngineError::Inference("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::Engine(err).status(), expected);
        }
        assert_eq!(
            ApiError::BadRequest("empty".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_chat_request_overrides() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hi"}],"temperature":0.2,"top_k":8}"#,
        )
        .unwrap();
        let request: GenerationRequest = req.into();
        assert!(matches!(request.input, PromptInput::Messages(ref m) if m.len() == 1));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.top_k, Some(8));
        assert_eq!(request.max_tokens, None);
    }

    #[test]
    fn test_retry_after_on_exhaustion() {
        let response =
            ApiError::Engine(EngineError::ResourceExhausted("oom".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], RETRY_AFTER_SECS);
    }
}
