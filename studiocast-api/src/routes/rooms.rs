//! Room CRUD, stream-key management and HLS readiness.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use studiocast_core::models::{CameraConfig, Role, Room};

use crate::auth::{require_room_role, require_studio_role};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Room view without the stream key; the key is only exposed to admins
/// through the dedicated endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: u64,
    pub studio_id: u64,
    pub room_number: u32,
    pub name: String,
    pub is_active: bool,
}

impl From<Room> for RoomView {
    fn from(room: Room) -> Self {
        Self {
            id: room.id,
            studio_id: room.studio_id,
            room_number: room.room_number,
            name: room.name,
            is_active: room.is_active,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub room_number: u32,
    pub name: String,
}

/// `POST /api/studios/{studio_id}/rooms`
pub async fn create(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<CreateRoomRequest>,
) -> AppResult<(StatusCode, Json<RoomView>)> {
    require_studio_role(&state, &headers, studio_id, Role::Admin)?;
    let room = state.studios.create_room(studio_id, req.room_number, req.name)?;
    Ok((StatusCode::CREATED, Json(room.into())))
}

/// `GET /api/studios/{studio_id}/rooms`
pub async fn list(
    State(state): State<AppState>,
    Path(studio_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<RoomView>>> {
    require_studio_role(&state, &headers, studio_id, Role::Viewer)?;
    let rooms = state.studios.rooms_for_studio(studio_id)?;
    Ok(Json(rooms.into_iter().map(RoomView::from).collect()))
}

/// `GET /api/rooms/{room_id}`
pub async fn get(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<RoomView>> {
    require_room_role(&state, &headers, room_id, Role::Viewer)?;
    let room = state
        .studios
        .get_room(room_id)?
        .ok_or_else(|| AppError::not_found("Room not found"))?;
    Ok(Json(room.into()))
}

/// `DELETE /api/rooms/{room_id}` — refused while the room is live.
pub async fn delete(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    require_room_role(&state, &headers, room_id, Role::Admin)?;
    state.studios.delete_room(room_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamKeyResponse {
    pub room_id: u64,
    pub stream_key: String,
}

/// `GET /api/rooms/{room_id}/stream-key`
pub async fn stream_key(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<StreamKeyResponse>> {
    require_room_role(&state, &headers, room_id, Role::Admin)?;
    let room = state
        .studios
        .get_room(room_id)?
        .ok_or_else(|| AppError::not_found("Room not found"))?;
    Ok(Json(StreamKeyResponse {
        room_id,
        stream_key: room.stream_key,
    }))
}

/// `POST /api/rooms/{room_id}/stream-key/rotate`
pub async fn rotate_stream_key(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<StreamKeyResponse>> {
    require_room_role(&state, &headers, room_id, Role::Admin)?;
    let room = state.studios.rotate_stream_key(room_id)?;
    Ok(Json(StreamKeyResponse {
        room_id,
        stream_key: room.stream_key,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraRequest {
    pub rtsp_url: String,
}

/// `PUT /api/rooms/{room_id}/camera`
pub async fn set_camera(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<CameraRequest>,
) -> AppResult<Json<CameraConfig>> {
    require_room_role(&state, &headers, room_id, Role::Admin)?;
    Ok(Json(state.studios.set_camera_config(room_id, req.rtsp_url)?))
}

/// `DELETE /api/rooms/{room_id}/camera`
pub async fn delete_camera(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    require_room_role(&state, &headers, room_id, Role::Admin)?;
    state.studios.delete_camera_config(room_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

/// `GET /api/rooms/{room_id}/ready` — single HLS readiness probe; clients
/// poll until true before loading the master playlist.
pub async fn hls_ready(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
) -> AppResult<Json<ReadyResponse>> {
    let ready = state.transcoder.hls_ready(&room_id.to_string()).await;
    Ok(Json(ReadyResponse { ready }))
}
