//! Access-code endpoints: anonymous validation plus admin lifecycle.

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use studiocast_core::models::{CodeType, Role};
use studiocast_core::service::anonymize_ip;

use crate::auth::{require_room_role, require_studio_role};
use crate::cookie::SessionCookie;
use crate::error::{AppError, AppResult};
use crate::state::{client_ip, AppState};

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub success: bool,
    pub session_token: String,
    pub redirect_to: String,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub code_type: &'static str,
    pub target_id: u64,
}

/// `POST /api/validate-access-code`
///
/// On success the signed viewer cookie is set alongside the JSON body.
pub async fn validate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ValidateRequest>,
) -> AppResult<Response> {
    let ip = client_ip(&headers, peer);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let outcome = state.codes.validate_code(&req.code, &ip, user_agent)?;

    let cookie = SessionCookie::for_code_session(
        outcome.session_token.clone(),
        req.code,
        outcome.expires_at,
    );
    let set_cookie = state
        .cookies
        .set_cookie_header(&cookie)
        .map_err(|e| AppError::internal(format!("cookie encoding: {e}")))?;

    let body = Json(ValidateResponse {
        success: true,
        session_token: outcome.session_token,
        redirect_to: outcome.redirect_to,
        expires_at: outcome.expires_at,
        code_type: outcome.code_type.as_str(),
        target_id: outcome.target_id,
    });
    Ok(([(header::SET_COOKIE, set_cookie)], body).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodeRequest {
    pub duration_minutes: i64,
    #[serde(default)]
    pub max_viewers: u32,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSummary {
    pub code: String,
    #[serde(rename = "type")]
    pub code_type: &'static str,
    pub target_id: u64,
    pub label: String,
    pub expires_at: DateTime<Utc>,
    pub max_viewers: u32,
    pub is_revoked: bool,
    pub current_viewers: u32,
    pub peak_viewers: u32,
    pub total_connections: u64,
}

fn summarize(state: &AppState, code: &studiocast_core::models::AccessCode) -> CodeSummary {
    let analytics = state.codes.code_analytics(&code.code).ok().flatten();
    CodeSummary {
        code: code.code.clone(),
        code_type: code.code_type.as_str(),
        target_id: code.target_id,
        label: code.label.clone(),
        expires_at: code.expires_at,
        max_viewers: code.max_viewers,
        is_revoked: code.is_revoked,
        current_viewers: analytics.as_ref().map_or(0, |a| a.current_viewers),
        peak_viewers: analytics.as_ref().map_or(0, |a| a.peak_viewers),
        total_connections: analytics.as_ref().map_or(0, |a| a.total_connections),
    }
}

/// `POST /api/rooms/{room_id}/codes`
pub async fn generate_room_code(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<GenerateCodeRequest>,
) -> AppResult<(StatusCode, Json<CodeSummary>)> {
    let (user_id, _) = require_room_role(&state, &headers, room_id, Role::Admin)?;
    let code = state.codes.generate_code(
        user_id,
        CodeType::Room,
        room_id,
        req.duration_minutes,
        req.max_viewers,
        req.label,
    )?;
    Ok((StatusCode::CREATED, Json(summarize(&state, &code))))
}

/// `POST /api/studios/{studio_id}/codes`
pub async fn generate_studio_code(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<GenerateCodeRequest>,
) -> AppResult<(StatusCode, Json<CodeSummary>)> {
    let user_id = require_studio_role(&state, &headers, studio_id, Role::Admin)?;
    let code = state.codes.generate_code(
        user_id,
        CodeType::Studio,
        studio_id,
        req.duration_minutes,
        req.max_viewers,
        req.label,
    )?;
    Ok((StatusCode::CREATED, Json(summarize(&state, &code))))
}

/// `GET /api/rooms/{room_id}/codes`
pub async fn list_room_codes(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<CodeSummary>>> {
    require_room_role(&state, &headers, room_id, Role::Admin)?;
    let codes = state.codes.codes_for_room(room_id)?;
    Ok(Json(codes.iter().map(|c| summarize(&state, c)).collect()))
}

/// `GET /api/studios/{studio_id}/codes`
pub async fn list_studio_codes(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<CodeSummary>>> {
    require_studio_role(&state, &headers, studio_id, Role::Admin)?;
    let codes = state.codes.codes_for_studio(studio_id)?;
    Ok(Json(codes.iter().map(|c| summarize(&state, c)).collect()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeResponse {
    pub success: bool,
    pub sessions_killed: usize,
}

/// `DELETE /api/codes/{code}`
pub async fn revoke(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<RevokeResponse>> {
    let record = state
        .codes
        .get_code(&code)?
        .ok_or_else(|| AppError::not_found("Access code not found"))?;
    match record.code_type {
        CodeType::Room => {
            require_room_role(&state, &headers, record.target_id, Role::Admin)?;
        }
        CodeType::Studio => {
            require_studio_role(&state, &headers, record.target_id, Role::Admin)?;
        }
    }

    let outcome = state.codes.revoke_code(&code)?;
    Ok(Json(RevokeResponse {
        success: true,
        sessions_killed: outcome.sessions_killed,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub token_prefix: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub client_ip: String,
    pub in_grace_period: bool,
}

/// `GET /api/codes/{code}/sessions` — anonymized session list for admins.
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<SessionSummary>>> {
    let record = state
        .codes
        .get_code(&code)?
        .ok_or_else(|| AppError::not_found("Access code not found"))?;
    match record.code_type {
        CodeType::Room => {
            require_room_role(&state, &headers, record.target_id, Role::Admin)?;
        }
        CodeType::Studio => {
            require_studio_role(&state, &headers, record.target_id, Role::Admin)?;
        }
    }

    let now = Utc::now();
    let sessions = state.store.with_read(|tx| {
        let mut sessions = Vec::new();
        for token in tx.str_targets(&studiocast_core::store::buckets::SESSIONS_BY_CODE, code.as_str())? {
            if let Some(session) = tx.get::<_, studiocast_core::models::CodeSession>(
                &studiocast_core::store::buckets::CODE_SESSIONS,
                token.as_str(),
            )? {
                sessions.push(SessionSummary {
                    token_prefix: session.token_prefix().to_string(),
                    connected_at: session.connected_at,
                    last_seen: session.last_seen,
                    client_ip: anonymize_ip(&session.client_ip),
                    in_grace_period: session.grace_period_until.is_some_and(|until| now < until),
                });
            }
        }
        Ok(sessions)
    })?;
    Ok(Json(sessions))
}
