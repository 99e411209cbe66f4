//! Per-room SSE stream.
//!
//! Subscribers are either staff (any membership in the owning studio) or
//! anonymous viewers holding a live code session. Each connection gets a
//! bounded outbox in the hub; its drop — client disconnect or slow-consumer
//! eviction — releases the viewer accounting. While a code session is
//! attached, a heartbeat refreshes its `last_seen` so the inactive-session
//! GC measures real liveness.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event as SseEvent, KeepAlive, KeepAliveStream, Sse},
};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use studiocast_core::models::Role;
use studiocast_core::service::{HubEvent, SubscriberGuard};

use crate::auth::{caller_from_headers, require_room_role, Caller};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

const SESSION_TOUCH_INTERVAL: Duration = Duration::from_secs(60);

/// `GET /api/rooms/{room_id}/events`
pub async fn subscribe(
    State(state): State<AppState>,
    Path(room_id): Path<u64>,
    headers: HeaderMap,
) -> AppResult<Sse<KeepAliveStream<EventStream>>> {
    let (session_token, user_id) = match caller_from_headers(&state, &headers) {
        Some(Caller::User { user_id }) => {
            require_room_role(&state, &headers, room_id, Role::Viewer)?;
            (None, Some(user_id))
        }
        Some(Caller::CodeSession { session_token }) => {
            state.codes.check_room_access(&session_token, room_id)?;
            (Some(session_token), None)
        }
        None => return Err(AppError::unauthorized("Sign in or enter an access code")),
    };

    let (guard, rx) = state.hub.subscribe(room_id, session_token.clone(), user_id);
    if let Err(e) = state.analytics.viewer_joined(room_id) {
        tracing::warn!(room_id, "viewer accounting failed: {e}");
    }
    state.hub.broadcast_viewer_count(room_id);
    tracing::info!(
        room_id,
        subscriber = guard.id(),
        viewer = session_token.is_some(),
        "SSE client connected"
    );

    // Keep the backing code session alive while the stream is open.
    let heartbeat = CancellationToken::new();
    if let Some(token) = session_token {
        let codes = state.codes.clone();
        let stop = heartbeat.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_TOUCH_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = codes.touch_session(&token) {
                            tracing::debug!("session heartbeat failed: {e}");
                            break;
                        }
                    }
                }
            }
        });
    }

    let stream = EventStream {
        rx,
        _guard: guard,
        cleanup: Some(Cleanup {
            state: state.clone(),
            room_id,
            heartbeat,
        }),
    };
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}

struct Cleanup {
    state: AppState,
    room_id: u64,
    heartbeat: CancellationToken,
}

/// Hub outbox adapted to SSE frames. Dropping it unsubscribes (via the
/// guard) and rolls back the viewer accounting.
pub struct EventStream {
    rx: mpsc::Receiver<HubEvent>,
    _guard: SubscriberGuard,
    cleanup: Option<Cleanup>,
}

impl Stream for EventStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut()
            .rx
            .poll_recv(cx)
            .map(|maybe| maybe.map(|event| Ok(to_sse_event(&event))))
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.heartbeat.cancel();
            if let Err(e) = cleanup.state.analytics.viewer_left(cleanup.room_id) {
                tracing::warn!(room_id = cleanup.room_id, "viewer accounting failed: {e}");
            }
            cleanup.state.hub.broadcast_viewer_count(cleanup.room_id);
            tracing::debug!(room_id = cleanup.room_id, "SSE client disconnected");
        }
    }
}

fn to_sse_event(event: &HubEvent) -> SseEvent {
    match serde_json::to_string(event) {
        Ok(data) => SseEvent::default().event(event.event_type()).data(data),
        Err(e) => {
            tracing::error!("failed to serialize hub event: {e}");
            SseEvent::default().comment("serialization error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_frame_shape() {
        let event = HubEvent::RoomStatus {
            room_id: 7,
            is_active: true,
        };
        assert_eq!(event.event_type(), "room_status");
        let json = serde_json::to_string(&event).expect("json");
        assert!(json.contains("\"isActive\":true"));
        assert!(json.contains("\"roomId\":7"));
    }
}
