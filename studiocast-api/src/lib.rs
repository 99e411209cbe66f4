//! HTTP surface: RTMP origin hooks, access-code validation, per-room SSE,
//! and the admin CRUD routes.

pub mod auth;
pub mod cookie;
pub mod error;
pub mod routes;
pub mod state;

use axum::{
    extract::State,
    routing::{delete, get, post, put},
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use state::AppState;

/// Assemble the full router over the shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        // RTMP origin callbacks
        .route("/hooks/on_publish", post(routes::hooks::on_publish))
        .route("/hooks/on_unpublish", post(routes::hooks::on_unpublish))
        // Anonymous viewer entry
        .route("/api/validate-access-code", post(routes::codes::validate))
        .route("/api/rooms/{room_id}/events", get(routes::events::subscribe))
        .route("/api/rooms/{room_id}/ready", get(routes::rooms::hls_ready))
        .route("/api/rooms/{room_id}/qoe", post(routes::analytics::ingest_qoe))
        // Studios
        .route("/api/studios", post(routes::studios::create).get(routes::studios::list_mine))
        .route(
            "/api/studios/{studio_id}",
            get(routes::studios::get)
                .patch(routes::studios::update)
                .delete(routes::studios::delete),
        )
        .route(
            "/api/studios/{studio_id}/members",
            post(routes::studios::add_member).get(routes::studios::list_members),
        )
        .route(
            "/api/studios/{studio_id}/members/{user_id}",
            delete(routes::studios::remove_member),
        )
        .route(
            "/api/studios/{studio_id}/rooms",
            post(routes::rooms::create).get(routes::rooms::list),
        )
        .route(
            "/api/studios/{studio_id}/codes",
            post(routes::codes::generate_studio_code).get(routes::codes::list_studio_codes),
        )
        .route("/api/studios/{studio_id}/analytics", get(routes::analytics::studio))
        .route(
            "/api/studios/{studio_id}/analytics/reconcile",
            post(routes::analytics::reconcile),
        )
        // Rooms
        .route(
            "/api/rooms/{room_id}",
            get(routes::rooms::get).delete(routes::rooms::delete),
        )
        .route("/api/rooms/{room_id}/stream-key", get(routes::rooms::stream_key))
        .route(
            "/api/rooms/{room_id}/stream-key/rotate",
            post(routes::rooms::rotate_stream_key),
        )
        .route(
            "/api/rooms/{room_id}/camera",
            put(routes::rooms::set_camera).delete(routes::rooms::delete_camera),
        )
        .route(
            "/api/rooms/{room_id}/codes",
            post(routes::codes::generate_room_code).get(routes::codes::list_room_codes),
        )
        .route("/api/rooms/{room_id}/analytics", get(routes::analytics::room))
        .route(
            "/api/rooms/{room_id}/schedules",
            post(routes::schedules::create).get(routes::schedules::list_for_room),
        )
        .route(
            "/api/rooms/{room_id}/schedule-logs",
            get(routes::schedules::logs_for_room),
        )
        // Codes
        .route("/api/codes/{code}", delete(routes::codes::revoke))
        .route("/api/codes/{code}/sessions", get(routes::codes::list_sessions))
        // Schedules
        .route(
            "/api/schedules/{schedule_id}",
            put(routes::schedules::update).delete(routes::schedules::delete),
        )
        .route(
            "/api/schedules/{schedule_id}/logs",
            get(routes::schedules::logs_for_schedule),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    // A cheap read proves the store is reachable.
    let store_ok = state.store.with_read(|_| Ok(())).is_ok();
    Json(serde_json::json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "store": store_ok,
        "activeTranscoders": state.transcoder.active_count(),
    }))
}
