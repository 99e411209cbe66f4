//! Class schedule CRUD and execution history.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use studiocast_core::models::{ClassSchedule, Role, ScheduleExecutionLog};

use crate::auth::{require_room_role, require_studio_role};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub name: String,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recur_weekdays: Vec<u8>,
    #[serde(default)]
    pub recur_time_start: String,
    #[serde(default)]
    pub recur_time_end: String,
    #[serde(default)]
    pub recur_timezone: String,
    #[serde(default)]
    pub recur_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub recur_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub pre_roll_minutes: i64,
    #[serde(default)]
    pub post_roll_minutes: i64,
    #[serde(default = "default_true")]
    pub auto_start_camera: bool,
    #[serde(default = "default_true")]
    pub auto_stop_camera: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl ScheduleRequest {
    fn into_schedule(self, id: u64, studio_id: u64, room_id: u64) -> ClassSchedule {
        ClassSchedule {
            id,
            studio_id,
            room_id,
            name: self.name,
            is_recurring: self.is_recurring,
            start_time: self.start_time,
            end_time: self.end_time,
            recur_weekdays: self.recur_weekdays,
            recur_time_start: self.recur_time_start,
            recur_time_end: self.recur_time_end,
            recur_timezone: self.recur_timezone,
            recur_start_date: self.recur_start_date,
            recur_end_date: self.recur_end_date,
            pre_roll_minutes: self.pre_roll_minutes,
            post_roll_minutes: self.post_roll_minutes,
            auto_start_camera: self.auto_start_camera,
            auto_stop_camera: self.auto_stop_camera,
            is_active: self.is_active,
        }
    }
}

/// `POST /api/rooms/{room_id}/schedules`
pub async fn create(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<ScheduleRequest>,
) -> AppResult<(StatusCode, Json<ClassSchedule>)> {
    let (_, studio_id) = require_room_role(&state, &headers, room_id, Role::Admin)?;
    let schedule = state
        .scheduler
        .create_schedule(req.into_schedule(0, studio_id, room_id))?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// `PUT /api/schedules/{schedule_id}`
pub async fn update(
    State(state): State<AppState>,
    Path(schedule_id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<ScheduleRequest>,
) -> AppResult<Json<ClassSchedule>> {
    let existing = state
        .scheduler
        .get_schedule(schedule_id)?
        .ok_or_else(|| AppError::not_found("Schedule not found"))?;
    require_studio_role(&state, &headers, existing.studio_id, Role::Admin)?;
    let schedule = state
        .scheduler
        .update_schedule(req.into_schedule(schedule_id, existing.studio_id, existing.room_id))?;
    Ok(Json(schedule))
}

/// `DELETE /api/schedules/{schedule_id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(schedule_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    let existing = state
        .scheduler
        .get_schedule(schedule_id)?
        .ok_or_else(|| AppError::not_found("Schedule not found"))?;
    require_studio_role(&state, &headers, existing.studio_id, Role::Admin)?;
    state.scheduler.delete_schedule(schedule_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/rooms/{room_id}/schedules`
pub async fn list_for_room(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<ClassSchedule>>> {
    require_room_role(&state, &headers, room_id, Role::Member)?;
    Ok(Json(state.scheduler.schedules_for_room(room_id)?))
}

/// `GET /api/schedules/{schedule_id}/logs`
pub async fn logs_for_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<ScheduleExecutionLog>>> {
    let existing = state
        .scheduler
        .get_schedule(schedule_id)?
        .ok_or_else(|| AppError::not_found("Schedule not found"))?;
    require_studio_role(&state, &headers, existing.studio_id, Role::Member)?;
    Ok(Json(state.scheduler.logs_for_schedule(schedule_id)?))
}

/// `GET /api/rooms/{room_id}/schedule-logs`
pub async fn logs_for_room(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<ScheduleExecutionLog>>> {
    require_room_role(&state, &headers, room_id, Role::Member)?;
    Ok(Json(state.scheduler.logs_for_room(room_id)?))
}
