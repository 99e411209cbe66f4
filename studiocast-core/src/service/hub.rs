//! In-process fan-out of room and code lifecycle events to SSE subscribers.
//!
//! Each subscriber owns a bounded outbox; broadcasts never block the
//! producer. A subscriber whose outbox is full is dropped on the spot
//! (slow-consumer policy) and cleans up like a normal disconnect. Within
//! one outbox delivery is FIFO; across subscribers no order is guaranteed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

/// Outbox depth per subscriber.
pub const OUTBOX_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum HubEvent {
    RoomStatus {
        room_id: u64,
        is_active: bool,
    },
    ViewerCount {
        room_id: u64,
        count: usize,
    },
    CodeRevoked {
        room_id: u64,
    },
    CodeExpiredGracePeriod {
        room_id: u64,
        grace_minutes: i64,
    },
}

impl HubEvent {
    /// SSE `event:` field value.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RoomStatus { .. } => "room_status",
            Self::ViewerCount { .. } => "viewer_count",
            Self::CodeRevoked { .. } => "code_revoked",
            Self::CodeExpiredGracePeriod { .. } => "code_expired_grace_period",
        }
    }
}

struct Subscriber {
    room_id: u64,
    session_token: Option<String>,
    #[allow(dead_code)]
    user_id: Option<u64>,
    outbox: mpsc::Sender<HubEvent>,
}

#[derive(Default)]
struct HubState {
    /// room id -> subscriber id -> subscriber
    rooms: HashMap<u64, HashMap<u64, Subscriber>>,
}

/// Multiplexed event broadcaster keyed by room.
pub struct EventHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber for `room_id`. The returned guard unsubscribes
    /// on drop; the receiver is the subscriber's outbox.
    pub fn subscribe(
        self: &Arc<Self>,
        room_id: u64,
        session_token: Option<String>,
        user_id: Option<u64>,
    ) -> (SubscriberGuard, mpsc::Receiver<HubEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber {
            room_id,
            session_token,
            user_id,
            outbox: tx,
        };
        self.state
            .lock()
            .rooms
            .entry(room_id)
            .or_default()
            .insert(id, subscriber);
        let guard = SubscriberGuard {
            hub: Arc::clone(self),
            id,
            room_id,
        };
        (guard, rx)
    }

    fn unsubscribe(&self, room_id: u64, id: u64) {
        let mut state = self.state.lock();
        if let Some(subs) = state.rooms.get_mut(&room_id) {
            subs.remove(&id);
            if subs.is_empty() {
                state.rooms.remove(&room_id);
            }
        }
    }

    /// Room went online/offline.
    pub fn broadcast_room_status(&self, room_id: u64, is_active: bool) {
        self.broadcast_where(room_id, HubEvent::RoomStatus { room_id, is_active }, |_| true);
    }

    /// Current subscriber count changed.
    pub fn broadcast_viewer_count(&self, room_id: u64) {
        let count = self.room_subscriber_count(room_id);
        self.broadcast_where(room_id, HubEvent::ViewerCount { room_id, count }, |_| true);
    }

    /// Code revoked: deliver only to the exact session-token set.
    pub fn broadcast_code_revoked(&self, room_id: u64, session_tokens: &[String]) {
        self.broadcast_where(room_id, HubEvent::CodeRevoked { room_id }, |sub| {
            sub.session_token
                .as_ref()
                .is_some_and(|t| session_tokens.iter().any(|s| s == t))
        });
    }

    /// Code expired; sessions got a grace period.
    pub fn broadcast_code_expired_grace_period(&self, room_id: u64, grace_minutes: i64) {
        self.broadcast_where(
            room_id,
            HubEvent::CodeExpiredGracePeriod {
                room_id,
                grace_minutes,
            },
            |_| true,
        );
    }

    /// Send `event` to every subscriber of `room_id` matching `filter`,
    /// dropping subscribers whose outbox is full or closed.
    fn broadcast_where(
        &self,
        room_id: u64,
        event: HubEvent,
        filter: impl Fn(&Subscriber) -> bool,
    ) {
        let mut state = self.state.lock();
        let Some(subs) = state.rooms.get_mut(&room_id) else {
            return;
        };
        let mut dropped = Vec::new();
        for (&id, sub) in subs.iter() {
            if !filter(sub) {
                continue;
            }
            match sub.outbox.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(room_id, subscriber_id = id, "dropping slow SSE subscriber");
                    dropped.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(id),
            }
        }
        for id in dropped {
            subs.remove(&id);
        }
        if subs.is_empty() {
            state.rooms.remove(&room_id);
        }
    }

    /// Subscribers currently registered for one room.
    #[must_use]
    pub fn room_subscriber_count(&self, room_id: u64) -> usize {
        self.state
            .lock()
            .rooms
            .get(&room_id)
            .map_or(0, HashMap::len)
    }

    /// Snapshot: room id -> subscriber count. Reconciliation input.
    #[must_use]
    pub fn current_viewer_counts(&self) -> HashMap<u64, usize> {
        self.state
            .lock()
            .rooms
            .iter()
            .map(|(&room_id, subs)| (room_id, subs.len()))
            .collect()
    }

    /// Snapshot: session token -> subscriber count. Reconciliation input.
    #[must_use]
    pub fn code_session_counts(&self) -> HashMap<String, usize> {
        let state = self.state.lock();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for subs in state.rooms.values() {
            for sub in subs.values() {
                if let Some(token) = &sub.session_token {
                    *counts.entry(token.clone()).or_default() += 1;
                }
            }
        }
        counts
    }
}

/// RAII registration handle; dropping it unsubscribes. Unsubscribe is
/// idempotent, so an explicit drop after the hub already removed the
/// subscriber (slow consumer) is harmless.
pub struct SubscriberGuard {
    hub: Arc<EventHub>,
    id: u64,
    room_id: u64,
}

impl SubscriberGuard {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.room_id, self.id);
    }
}
