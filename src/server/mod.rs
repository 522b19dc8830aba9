use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::relay::{CompletionRelay, ErrorReport};

mod error;

pub use error::{ApiError, ErrorResponse};

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<CompletionRelay>,
}

impl AppState {
    pub fn new(relay: CompletionRelay) -> Self {
        Self {
            relay: Arc::new(relay),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayReply {
    pub result: String,
}

#[derive(Debug, Deserialize)]
struct HandleErrorBody {
    error_type: Option<Value>,
    error_log: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HandleMessageBody {
    message: Option<String>,
    user_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/handle-error", post(handle_error))
        .route("/handle-message", post(handle_message))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[Server] Listening on {}", addr);
    axum::serve(listener, router(state).into_make_service())
        .await
        .map_err(|err| anyhow::anyhow!("server error: {err}"))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "WP Agent is live", "status": "ok" }))
}

fn required(field: Option<String>, name: &str) -> Result<String, ApiError> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ApiError::bad_request(format!("missing required field '{}'", name))),
    }
}

/// Plugins send status-style types such as `404` either quoted or bare.
fn error_type(field: Option<Value>) -> Result<String, ApiError> {
    match field {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) => required(Some(s), "error_type"),
        Some(Value::Null) | None => required(None, "error_type"),
        Some(_) => Err(ApiError::bad_request(
            "field 'error_type' must be a string or number",
        )),
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

async fn handle_error(
    State(state): State<AppState>,
    payload: Result<Json<HandleErrorBody>, JsonRejection>,
) -> Result<Json<RelayReply>, ApiError> {
    let body = json_body(payload)?;
    let report = ErrorReport {
        error_type: error_type(body.error_type)?,
        error_log: body.error_log,
    };

    let result = state.relay.relay_error(&report).await;
    Ok(Json(RelayReply { result }))
}

async fn handle_message(
    State(state): State<AppState>,
    payload: Result<Json<HandleMessageBody>, JsonRejection>,
) -> Result<Json<RelayReply>, ApiError> {
    let body = json_body(payload)?;
    let message = required(body.message, "message")?;
    let user_id = required(body.user_id, "user_id")?;

    let result = state.relay.relay_message(&user_id, &message).await?;
    Ok(Json(RelayReply { result }))
}
