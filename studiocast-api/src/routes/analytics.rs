//! Analytics reads, player QoE ingestion, and the reconciliation trigger.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use studiocast_core::models::{Role, RoomAnalytics, StudioAnalytics};
use studiocast_core::service::{PlaybackErrorKind, ReconcileReport};

use crate::auth::{require_room_role, require_studio_role};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// `GET /api/rooms/{room_id}/analytics`
pub async fn room(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<RoomAnalytics>> {
    require_room_role(&state, &headers, room_id, Role::Member)?;
    let analytics = state
        .analytics
        .room_analytics(room_id)?
        .unwrap_or_else(|| RoomAnalytics::new(room_id));
    Ok(Json(analytics))
}

/// `GET /api/studios/{studio_id}/analytics`
pub async fn studio(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<StudioAnalytics>> {
    require_studio_role(&state, &headers, studio_id, Role::Member)?;
    // Recompute on read so the rollup tracks its rooms.
    Ok(Json(state.analytics.recompute_studio(studio_id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum QoeEvent {
    Startup { success: bool },
    Rebuffer { seconds: f64 },
    Error { kind: String },
    Quality { height: u32, seconds: f64 },
}

/// `POST /api/rooms/{room_id}/qoe` — player-reported quality events.
/// Accepts viewer cookies implicitly: the player only reaches this after
/// passing the SSE/room access gate, so the endpoint just validates shape.
pub async fn ingest_qoe(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    Json(event): Json<QoeEvent>,
) -> AppResult<Json<serde_json::Value>> {
    match event {
        QoeEvent::Startup { success } => state.analytics.startup_attempt(room_id, success)?,
        QoeEvent::Rebuffer { seconds } => {
            if !(0.0..=3600.0).contains(&seconds) {
                return Err(AppError::bad_request("implausible rebuffer duration"));
            }
            state.analytics.rebuffer(room_id, seconds)?;
        }
        QoeEvent::Error { kind } => {
            let kind = match kind.as_str() {
                "network" => PlaybackErrorKind::Network,
                "media" => PlaybackErrorKind::Media,
                _ => PlaybackErrorKind::Other,
            };
            state.analytics.playback_error(room_id, kind)?;
        }
        QoeEvent::Quality { height, seconds } => {
            if !(0.0..=3600.0).contains(&seconds) {
                return Err(AppError::bad_request("implausible watch duration"));
            }
            state.analytics.quality_seconds(room_id, height, seconds)?;
        }
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub rooms_updated: usize,
    pub codes_updated: usize,
}

impl From<ReconcileReport> for ReconcileResponse {
    fn from(report: ReconcileReport) -> Self {
        Self {
            rooms_updated: report.rooms_updated,
            codes_updated: report.codes_updated,
        }
    }
}

/// `POST /api/studios/{studio_id}/analytics/reconcile`
///
/// Admin-triggered authoritative reset of the viewer counters.
pub async fn reconcile(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<ReconcileResponse>> {
    require_studio_role(&state, &headers, studio_id, Role::Admin)?;
    let report = state.analytics.reconcile()?;
    Ok(Json(report.into()))
}
