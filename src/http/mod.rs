//! The HTTP surface: session bootstrap, the NDJSON chat endpoint, and a
//! dependency-free liveness probe.

pub mod types;

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::http::types::{ChatRequest, SessionStartResponse, UserContextHeader};
use crate::orchestrator::ChatOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub app_env: String,
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/session/start", post(start_session))
        .route("/query", post(chat))
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn start_session(State(state): State<AppState>) -> Json<SessionStartResponse> {
    let (session_id, message) = state.orchestrator.start_session().await;
    Json(SessionStartResponse {
        session_id,
        message: message.to_string(),
    })
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "env": state.app_env }))
}

/// Decodes the optional `x-user-context` header (base64 JSON), folding
/// `user_id`/`user_role` into the request and every other key (including
/// `user_name`, `company_name`, `company_id`) into `metadata`. A malformed
/// header is logged and otherwise ignored; it never fails the request.
async fn chat(State(state): State<AppState>, headers: HeaderMap, Json(mut request): Json<ChatRequest>) -> impl IntoResponse {
    if request.session_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "session_id must not be empty").into_response();
    }

    if let Some(header_value) = headers.get("x-user-context").and_then(|v| v.to_str().ok()) {
        apply_user_context(&mut request, header_value);
    }

    let lines = state.orchestrator.handle_chat(request).await;
    let body = Body::from_stream(futures::stream::iter(
        lines.into_iter().map(Ok::<_, std::io::Error>),
    ));

    axum::response::Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/x-ndjson")
        .body(body)
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to build ndjson response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

fn apply_user_context(request: &mut ChatRequest, header_value: &str) {
    let decode = BASE64
        .decode(header_value.as_bytes())
        .map_err(|e| e.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()))
        .and_then(|text| serde_json::from_str::<UserContextHeader>(&text).map_err(|e| e.to_string()));

    match decode {
        Ok(context) => {
            if let Some(user_id) = context.user_id.clone() {
                request.user_id = Some(user_id.clone());
                request
                    .metadata
                    .insert("user_id".to_string(), serde_json::Value::String(user_id));
            }
            if let Some(user_role) = context.user_role.clone() {
                request.user_role = Some(user_role.clone());
                request
                    .metadata
                    .insert("user_role".to_string(), serde_json::Value::String(user_role));
            }
            for (key, value) in context.extra {
                request.metadata.insert(key, value);
            }
        }
        Err(e) => {
            error!(error = %e, "failed to decode x-user-context header, ignoring");
        }
    }
}
