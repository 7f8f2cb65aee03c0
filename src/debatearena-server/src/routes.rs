//! REST control surface.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use debatearena_core::SessionSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub reply_scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responder: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub live: bool,
    pub viewers: usize,
}

pub async fn get_debate(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.orchestrator.snapshot().await)
}

pub async fn start_debate(State(state): State<AppState>) -> Json<ControlResponse> {
    let started = state.orchestrator.start().await;
    if started {
        info!("Debate started via API");
    }
    Json(ControlResponse {
        success: started,
        message: if started {
            "Debate started".to_string()
        } else {
            "Debate is already running".to_string()
        },
    })
}

pub async fn stop_debate(State(state): State<AppState>) -> Json<ControlResponse> {
    let stopped = state.orchestrator.stop().await;
    if stopped {
        info!("Debate stopped via API");
    }
    Json(ControlResponse {
        success: stopped,
        message: if stopped {
            "Debate stopped".to_string()
        } else {
            "Debate is not running".to_string()
        },
    })
}

pub async fn post_chat(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let Json(request) = request.map_err(|rejection| {
        debug!(error = %rejection.body_text(), "Malformed chat request");
        ApiError::BadRequest("Chat message is required".to_string())
    })?;
    let ack = state.orchestrator.handle_chat(&request.message).await?;
    Ok(Json(ChatResponse {
        success: true,
        reply_scheduled: ack.reply_scheduled,
        responder: ack.responder,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.orchestrator.snapshot().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        live: snapshot.is_live,
        viewers: state.orchestrator.subscriber_count(),
    })
}
