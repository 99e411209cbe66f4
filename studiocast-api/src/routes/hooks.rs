//! RTMP origin callbacks.
//!
//! SRS posts `{action, client_id, ip, stream}` on publish and unpublish;
//! `{code: 0}` accepts, anything else rejects. Rejection reasons are
//! logged here, never leaked to the origin.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SrsHookRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub stream: String,
}

#[derive(Debug, Serialize)]
pub struct SrsHookResponse {
    pub code: i32,
}

const ACCEPT: SrsHookResponse = SrsHookResponse { code: 0 };
const REJECT: SrsHookResponse = SrsHookResponse { code: 1 };

/// `POST /hooks/on_publish`
pub async fn on_publish(
    State(state): State<AppState>,
    Json(req): Json<SrsHookRequest>,
) -> Json<SrsHookResponse> {
    match state
        .lifecycle
        .on_publish(&req.stream, &req.ip, &req.client_id)
        .await
    {
        Ok(room_id) => {
            tracing::debug!(room_id, action = %req.action, "publish hook accepted");
            Json(ACCEPT)
        }
        Err(e) => {
            tracing::warn!(client_ip = %req.ip, "publish hook rejected: {e}");
            Json(REJECT)
        }
    }
}

/// `POST /hooks/on_unpublish`
pub async fn on_unpublish(
    State(state): State<AppState>,
    Json(req): Json<SrsHookRequest>,
) -> Json<SrsHookResponse> {
    match state.lifecycle.on_unpublish(&req.stream).await {
        Ok(room_id) => {
            tracing::debug!(room_id, "unpublish hook handled");
            Json(ACCEPT)
        }
        Err(e) => {
            tracing::warn!("unpublish hook for unknown stream: {e}");
            Json(REJECT)
        }
    }
}
