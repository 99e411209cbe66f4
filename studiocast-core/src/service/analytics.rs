//! Viewer and quality-of-experience accounting.
//!
//! Counter mutations happen inside store transactions; the in-memory hub
//! keeps its own subscriber counts. The two drift under crashes and
//! dropped subscribers, so [`AnalyticsService::reconcile`] is the
//! authoritative reset: room viewer counts come from the hub snapshot,
//! per-code viewer counts from the live session records.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;

use crate::models::{CodeAnalytics, CodeSession, RoomAnalytics, StudioAnalytics};
use crate::service::hub::EventHub;
use crate::store::buckets::*;
use crate::store::Store;
use crate::Result;

#[derive(Debug, Clone, Copy)]
pub enum PlaybackErrorKind {
    Network,
    Media,
    Other,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileReport {
    pub rooms_updated: usize,
    pub codes_updated: usize,
}

pub struct AnalyticsService {
    store: Arc<Store>,
    hub: Arc<EventHub>,
}

impl AnalyticsService {
    pub fn new(store: Arc<Store>, hub: Arc<EventHub>) -> Self {
        Self { store, hub }
    }

    fn update_room<F: FnOnce(&mut RoomAnalytics)>(&self, room_id: u64, f: F) -> Result<()> {
        self.store.with_write(|tx| {
            let mut analytics: RoomAnalytics = tx
                .get(&ROOM_ANALYTICS, room_id)?
                .unwrap_or_else(|| RoomAnalytics::new(room_id));
            f(&mut analytics);
            tx.put(&ROOM_ANALYTICS, room_id, &analytics)
        })
    }

    /// An SSE viewer attached to the room.
    pub fn viewer_joined(&self, room_id: u64) -> Result<()> {
        self.update_room(room_id, |a| {
            a.current_viewers += 1;
            if a.current_viewers > a.peak_viewers {
                a.peak_viewers = a.current_viewers;
                a.peak_viewers_at = Some(Utc::now());
            }
        })
    }

    /// An SSE viewer detached from the room.
    pub fn viewer_left(&self, room_id: u64) -> Result<()> {
        self.update_room(room_id, |a| {
            a.current_viewers = a.current_viewers.saturating_sub(1);
        })
    }

    /// A publish began (or a player attempted startup).
    pub fn startup_attempt(&self, room_id: u64, success: bool) -> Result<()> {
        self.update_room(room_id, |a| {
            a.startup_attempts += 1;
            if !success {
                a.startup_failures += 1;
            }
        })
    }

    pub fn rebuffer(&self, room_id: u64, seconds: f64) -> Result<()> {
        self.update_room(room_id, |a| {
            a.rebuffer_events += 1;
            a.rebuffer_seconds += seconds;
        })
    }

    pub fn playback_error(&self, room_id: u64, kind: PlaybackErrorKind) -> Result<()> {
        self.update_room(room_id, |a| {
            a.errors_total += 1;
            match kind {
                PlaybackErrorKind::Network => a.errors_network += 1,
                PlaybackErrorKind::Media => a.errors_media += 1,
                PlaybackErrorKind::Other => {}
            }
        })
    }

    /// Seconds watched at a given rung of the ladder (1080/720/480).
    pub fn quality_seconds(&self, room_id: u64, height: u32, seconds: f64) -> Result<()> {
        self.update_room(room_id, |a| match height {
            1080 => a.seconds_1080p += seconds,
            720 => a.seconds_720p += seconds,
            _ => a.seconds_480p += seconds,
        })
    }

    pub fn room_analytics(&self, room_id: u64) -> Result<Option<RoomAnalytics>> {
        self.store.with_read(|tx| tx.get(&ROOM_ANALYTICS, room_id))
    }

    pub fn studio_analytics(&self, studio_id: u64) -> Result<Option<StudioAnalytics>> {
        self.store
            .with_read(|tx| tx.get(&STUDIO_ANALYTICS, studio_id))
    }

    /// Fold the per-room counters of `studio_id` into its rollup record.
    pub fn recompute_studio(&self, studio_id: u64) -> Result<StudioAnalytics> {
        self.store.with_write(|tx| {
            let mut rollup = StudioAnalytics::new(studio_id);
            for room_id in tx.targets(&ROOMS_BY_STUDIO, studio_id)? {
                if let Some(room) = tx.get::<_, RoomAnalytics>(&ROOM_ANALYTICS, room_id)? {
                    rollup.absorb(&room);
                }
            }
            tx.put(&STUDIO_ANALYTICS, studio_id, &rollup)?;
            Ok(rollup)
        })
    }

    /// Authoritative reset of viewer counts.
    ///
    /// After this pass, `RoomAnalytics.current_viewers` equals the number
    /// of attached SSE subscribers per room, and `CodeAnalytics.current_viewers`
    /// equals the number of live sessions per code.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let room_counts = self.hub.current_viewer_counts();
        self.store.with_write(|tx| {
            let mut report = ReconcileReport::default();

            let mut room_ids = Vec::new();
            tx.for_each(&ROOM_ANALYTICS, |room_id, _: RoomAnalytics| {
                room_ids.push(room_id);
                true
            })?;
            for room_id in room_ids {
                let actual = room_counts.get(&room_id).copied().unwrap_or(0) as u32;
                let mut analytics: RoomAnalytics = tx
                    .get(&ROOM_ANALYTICS, room_id)?
                    .unwrap_or_else(|| RoomAnalytics::new(room_id));
                if analytics.current_viewers != actual {
                    analytics.current_viewers = actual;
                    tx.put(&ROOM_ANALYTICS, room_id, &analytics)?;
                    report.rooms_updated += 1;
                }
            }

            let mut codes = Vec::new();
            tx.for_each(&CODE_ANALYTICS, |code, _: CodeAnalytics| {
                codes.push(code.to_string());
                true
            })?;
            for code in codes {
                let mut live = 0u32;
                for token in tx.str_targets(&SESSIONS_BY_CODE, code.as_str())? {
                    if tx
                        .get::<_, CodeSession>(&CODE_SESSIONS, token.as_str())?
                        .is_some()
                    {
                        live += 1;
                    }
                }
                let mut analytics: CodeAnalytics = tx
                    .get(&CODE_ANALYTICS, code.as_str())?
                    .unwrap_or_else(|| CodeAnalytics::new(code.clone()));
                if analytics.current_viewers != live {
                    analytics.current_viewers = live;
                    tx.put(&CODE_ANALYTICS, code.as_str(), &analytics)?;
                    report.codes_updated += 1;
                }
            }
            Ok(report)
        })
    }
}

/// Zero the last IPv4 octet or the trailing IPv6 group for display. Full
/// addresses live only in transient session records.
#[must_use]
pub fn anonymize_ip(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let o = v4.octets();
            format!("{}.{}.{}.0", o[0], o[1], o[2])
        }
        Ok(IpAddr::V6(v6)) => {
            let mut segments = v6.segments();
            segments[7] = 0;
            std::net::Ipv6Addr::from(segments).to_string()
        }
        Err(_) => ip.to_string(),
    }
}
