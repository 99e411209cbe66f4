use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A provisioned ingestion target with a persistent stream key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: u64,
    pub studio_id: u64,
    pub room_number: u32,
    pub name: String,
    /// Secret identifying this room to the RTMP origin. Globally unique,
    /// URL-safe, rotatable.
    pub stream_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(id: u64, studio_id: u64, room_number: u32, name: String) -> Self {
        Self {
            id,
            studio_id,
            room_number,
            name,
            stream_key: generate_stream_key(),
            is_active: false,
            created_at: Utc::now(),
        }
    }
}

/// 32 random bytes, URL-safe base64 without padding.
#[must_use]
pub fn generate_stream_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Optional RTSP camera source for a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub room_id: u64,
    pub rtsp_url: String,
}

/// Audit row for one publish session, opened by `on_publish` and closed by
/// `on_unpublish` or the startup recovery sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: u64,
    pub room_id: u64,
    pub studio_id: u64,
    pub stream_key: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}
