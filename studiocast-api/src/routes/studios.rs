//! Studio and membership CRUD.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use studiocast_core::models::{Membership, Role, Studio};

use crate::auth::{require_studio_role, require_user};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStudioRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub max_rooms: Option<u32>,
}

/// `POST /api/studios`
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateStudioRequest>,
) -> AppResult<(StatusCode, Json<Studio>)> {
    let user_id = require_user(&state, &headers)?;
    let studio = state
        .studios
        .create_studio(user_id, req.name, req.description, req.max_rooms)?;
    Ok((StatusCode::CREATED, Json(studio)))
}

/// `GET /api/studios`
pub async fn list_mine(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<Studio>>> {
    let user_id = require_user(&state, &headers)?;
    Ok(Json(state.studios.studios_for_user(user_id)?))
}

/// `GET /api/studios/{studio_id}`
pub async fn get(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<Studio>> {
    require_studio_role(&state, &headers, studio_id, Role::Viewer)?;
    let studio = state
        .studios
        .get_studio(studio_id)?
        .ok_or_else(|| AppError::not_found("Studio not found"))?;
    Ok(Json(studio))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStudioRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_rooms: Option<u32>,
}

/// `PATCH /api/studios/{studio_id}`
pub async fn update(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<UpdateStudioRequest>,
) -> AppResult<Json<Studio>> {
    require_studio_role(&state, &headers, studio_id, Role::Admin)?;
    let studio = state
        .studios
        .update_studio(studio_id, req.name, req.description, req.max_rooms)?;
    Ok(Json(studio))
}

/// `DELETE /api/studios/{studio_id}` — cascades across every child entity.
pub async fn delete(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    require_studio_role(&state, &headers, studio_id, Role::Owner)?;
    state.studios.delete_studio(studio_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: u64,
    pub role: Role,
}

/// `POST /api/studios/{studio_id}/members`
pub async fn add_member(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<AddMemberRequest>,
) -> AppResult<(StatusCode, Json<Membership>)> {
    require_studio_role(&state, &headers, studio_id, Role::Admin)?;
    if req.role == Role::Owner {
        return Err(AppError::bad_request("ownership is not grantable"));
    }
    let membership = state.studios.add_member(studio_id, req.user_id, req.role)?;
    Ok((StatusCode::CREATED, Json(membership)))
}

/// `DELETE /api/studios/{studio_id}/members/{user_id}`
pub async fn remove_member(
    State(state): State<AppState>,
    Path((studio_id, user_id)): Path<(u64, u64)>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    require_studio_role(&state, &headers, studio_id, Role::Admin)?;
    state.studios.remove_member(studio_id, user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/studios/{studio_id}/members`
pub async fn list_members(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<Membership>>> {
    require_studio_role(&state, &headers, studio_id, Role::Member)?;
    Ok(Json(state.studios.members(studio_id)?))
}
