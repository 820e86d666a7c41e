use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use landcost_agent::runtime::AgentRuntime;
use landcost_agent::turn::{TurnReply, TurnRequest};
use landcost_core::errors::InterfaceError;
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
pub struct TurnApiState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    pub user_message: &'static str,
    pub correlation_id: String,
}

impl From<&InterfaceError> for ApiError {
    fn from(error: &InterfaceError) -> Self {
        Self {
            error: error.code(),
            message: error.message().to_string(),
            user_message: error.user_message(),
            correlation_id: error.correlation_id().to_string(),
        }
    }
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new().route("/v1/turns", post(post_turn)).with_state(TurnApiState { runtime })
}

/// One user turn in, one reply out. Processing failures surface inside the reply, never as
/// a 5xx.
pub async fn post_turn(
    State(state): State<TurnApiState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnReply>, (StatusCode, Json<ApiError>)> {
    if request.session_id.0.trim().is_empty() {
        return Err(rejected(InterfaceError::invalid_turn("session_id must not be empty", correlation_id())));
    }
    if request.text.trim().is_empty() {
        let correlation_id = format!("{}:{}", request.session_id.0, correlation_id());
        return Err(rejected(InterfaceError::invalid_turn("text must not be empty", correlation_id)));
    }
    Ok(Json(state.runtime.handle_turn(request).await))
}

fn correlation_id() -> String {
    format!("turn-{}", Utc::now().timestamp_micros())
}

fn rejected(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    warn!(
        event_name = "api.turn.rejected",
        reason = error.message(),
        correlation_id = error.correlation_id(),
        "turn request rejected"
    );
    (StatusCode::UNPROCESSABLE_ENTITY, Json(ApiError::from(&error)))
}
