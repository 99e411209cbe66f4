//! HLS readiness probe.
//!
//! FFmpeg writes the master playlist before the variant playlists have
//! segments, so a client that loads `master.m3u8` the moment it appears
//! will 404 on the variants. The probe reports ready only once the master
//! references the ladder and at least two of the three variant playlists
//! are non-empty.

use std::path::Path;
use std::time::Duration;

use crate::transcoder::VARIANTS;

/// One-shot readiness check for `{hls_base}/{room_id}`.
pub async fn hls_ready(hls_base: &Path, room_id: &str) -> bool {
    let room_dir = hls_base.join(room_id);
    let master = match tokio::fs::read_to_string(room_dir.join("master.m3u8")).await {
        Ok(contents) => contents,
        Err(_) => return false,
    };
    if master.is_empty()
        || !master.contains("#EXTM3U")
        || !master.contains("#EXT-X-STREAM-INF")
    {
        return false;
    }

    let mut ready_variants = 0;
    for (variant, _, _, _) in VARIANTS {
        let playlist = room_dir.join(variant.to_string()).join("stream.m3u8");
        if let Ok(metadata) = tokio::fs::metadata(&playlist).await {
            if metadata.len() > 0 {
                ready_variants += 1;
            }
        }
    }
    ready_variants >= 2
}

/// Poll [`hls_ready`] up to `max_attempts` times, `delay` apart, so
/// clients do not race FFmpeg's first flush.
pub async fn wait_for_hls_ready(
    hls_base: &Path,
    room_id: &str,
    max_attempts: u32,
    delay: Duration,
) -> bool {
    for attempt in 0..max_attempts {
        if hls_ready(hls_base, room_id).await {
            return true;
        }
        if attempt + 1 < max_attempts {
            tokio::time::sleep(delay).await;
        }
    }
    false
}
