//! Caller identity extraction.
//!
//! Identities arrive as signed session cookies: staff users carry a
//! `user_id` minted by the auth adapter; anonymous viewers carry the
//! code-session token issued by the validation endpoint.

use axum::http::HeaderMap;

use studiocast_core::models::Role;
use studiocast_core::Error;

use crate::cookie::{session_cookie_value, SessionCookie};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Who is calling.
#[derive(Debug, Clone)]
pub enum Caller {
    User { user_id: u64 },
    CodeSession { session_token: String },
}

/// Decode the session cookie, if any.
#[must_use]
pub fn caller_from_headers(state: &AppState, headers: &HeaderMap) -> Option<Caller> {
    let header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    let raw = session_cookie_value(header)?;
    let cookie: SessionCookie = state.cookies.decode(raw)?;
    if cookie.is_code_session {
        (!cookie.session_token.is_empty()).then_some(Caller::CodeSession {
            session_token: cookie.session_token,
        })
    } else {
        cookie.user_id.map(|user_id| Caller::User { user_id })
    }
}

/// Require a staff identity.
pub fn require_user(state: &AppState, headers: &HeaderMap) -> AppResult<u64> {
    match caller_from_headers(state, headers) {
        Some(Caller::User { user_id }) => Ok(user_id),
        _ => Err(AppError::unauthorized("Sign in to access this resource")),
    }
}

/// Require a staff identity holding `min_role` in `studio_id`.
pub fn require_studio_role(
    state: &AppState,
    headers: &HeaderMap,
    studio_id: u64,
    min_role: Role,
) -> AppResult<u64> {
    let user_id = require_user(state, headers)?;
    state
        .studios
        .require_role(user_id, studio_id, min_role)
        .map_err(AppError::from)?;
    Ok(user_id)
}

/// Require a staff identity holding `min_role` in the studio owning
/// `room_id`. Returns `(user_id, studio_id)`.
pub fn require_room_role(
    state: &AppState,
    headers: &HeaderMap,
    room_id: u64,
    min_role: Role,
) -> AppResult<(u64, u64)> {
    let room = state
        .studios
        .get_room(room_id)
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::from(Error::not_found("room")))?;
    let user_id = require_studio_role(state, headers, room.studio_id, min_role)?;
    Ok((user_id, room.studio_id))
}
