//! Health, readiness and reset endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::inference::{EngineState, EngineStatus};
use crate::server::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// One of `starting`, `initializing`, `ready`, `error`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failed initialization attempts so far
    pub attempts: u32,
}

impl From<EngineStatus> for HealthResponse {
    fn from(status: EngineStatus) -> Self {
        let error = match &status.state {
            EngineState::Failed(err) => Some(err.to_string()),
            _ => None,
        };
        Self {
            status: status.state.label().to_string(),
            error,
            attempts: status.attempts,
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.manager.status().into())
}

/// 200 only once the model has passed its smoke test
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let status = state.manager.status();
    let code = if status.state == EngineState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status.into()))
}

/// Unload the model and clear a latched failure
pub async fn reset(State(state): State<AppState>) -> Json<HealthResponse> {
    state.manager.reset();
    Json(state.manager.status().into())
}

#[derive(Serialize)]
pub struct IndexResponse {
    pub name: String,
    pub version: String,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Serialize)]
pub struct EndpointInfo {
    pub path: &'static str,
    pub description: &'static str,
}

pub async fn index() -> Json<IndexResponse> {
    let endpoints = vec![
        EndpointInfo { path: "POST /chat", description: "Chat with the model" },
        EndpointInfo { path: "POST /api/chat", description: "Complete a single prompt, with token usage" },
        EndpointInfo { path: "GET /health", description: "Engine state" },
        EndpointInfo { path: "GET /ready", description: "200 once the model is loaded" },
        EndpointInfo { path: "POST /engine/reset", description: "Unload the model and clear failures" },
    ];
    Json(IndexResponse {
        name: "llamachat".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints,
    })
}
