use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-room playback quality-of-experience counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomAnalytics {
    pub room_id: u64,
    pub startup_attempts: u64,
    pub startup_failures: u64,
    pub rebuffer_events: u64,
    pub rebuffer_seconds: f64,
    pub errors_total: u64,
    pub errors_network: u64,
    pub errors_media: u64,
    pub seconds_480p: f64,
    pub seconds_720p: f64,
    pub seconds_1080p: f64,
    pub avg_ttff_ms: f64,
    pub avg_rebuffer_ratio: f64,
    pub avg_bitrate_kbps: f64,
    pub current_viewers: u32,
    pub peak_viewers: u32,
    pub peak_viewers_at: Option<DateTime<Utc>>,
}

impl RoomAnalytics {
    pub fn new(room_id: u64) -> Self {
        Self {
            room_id,
            ..Self::default()
        }
    }
}

/// Studio-level rollup of the per-room counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioAnalytics {
    pub studio_id: u64,
    pub startup_attempts: u64,
    pub startup_failures: u64,
    pub rebuffer_events: u64,
    pub rebuffer_seconds: f64,
    pub errors_total: u64,
    pub errors_network: u64,
    pub errors_media: u64,
    pub seconds_480p: f64,
    pub seconds_720p: f64,
    pub seconds_1080p: f64,
    pub avg_ttff_ms: f64,
    pub avg_rebuffer_ratio: f64,
    pub avg_bitrate_kbps: f64,
    pub current_viewers: u32,
    pub peak_viewers: u32,
}

impl StudioAnalytics {
    pub fn new(studio_id: u64) -> Self {
        Self {
            studio_id,
            ..Self::default()
        }
    }

    /// Fold one room's counters into the studio rollup.
    pub fn absorb(&mut self, room: &RoomAnalytics) {
        self.startup_attempts += room.startup_attempts;
        self.startup_failures += room.startup_failures;
        self.rebuffer_events += room.rebuffer_events;
        self.rebuffer_seconds += room.rebuffer_seconds;
        self.errors_total += room.errors_total;
        self.errors_network += room.errors_network;
        self.errors_media += room.errors_media;
        self.seconds_480p += room.seconds_480p;
        self.seconds_720p += room.seconds_720p;
        self.seconds_1080p += room.seconds_1080p;
        self.current_viewers += room.current_viewers;
        self.peak_viewers = self.peak_viewers.max(room.peak_viewers);
    }
}
