//! RTMP to adaptive HLS transcoder supervisor.
//!
//! Each room gets one FFmpeg child producing a three-rung ladder
//! (0 = 1080p, 1 = 720p, 2 = 480p) under `{hls_base}/{room_id}/{variant}/`
//! with the master playlist at `{hls_base}/{room_id}/master.m3u8`.
//! Concurrency is capped; the output tree is removed on stop, and a
//! startup sweep clears directories orphaned by an earlier crash.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::child::{spawn_waiter, status_of, stop_child, ChildHandle, ChildTable};
use crate::keys::{validate_room_id, validate_source_url};
use crate::{ChildStatus, Result, SupervisorError};

/// Ladder rungs, highest first: directory index, height, video bitrate,
/// audio bitrate.
pub const VARIANTS: [(u32, u32, &str, &str); 3] = [
    (0, 1080, "5000k", "192k"),
    (1, 720, "2800k", "128k"),
    (2, 480, "1400k", "96k"),
];

#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_bin: String,
    pub hls_base: PathBuf,
    /// Upper bound on simultaneously running children, in (0, 100].
    pub max_concurrent: usize,
    pub stop_grace: Duration,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            hls_base: PathBuf::from("./hls"),
            max_concurrent: 8,
            stop_grace: Duration::from_secs(5),
        }
    }
}

pub struct TranscoderSupervisor {
    config: TranscoderConfig,
    children: ChildTable,
}

impl TranscoderSupervisor {
    #[must_use]
    pub fn new(config: TranscoderConfig) -> Self {
        Self {
            config,
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn room_dir(&self, room_id: &str) -> PathBuf {
        self.config.hls_base.join(room_id)
    }

    /// Transcode `input_url` into the room's HLS tree. Starting a room
    /// that is already transcoding is an idempotent no-op.
    pub async fn start(&self, room_id: &str, input_url: &str) -> Result<()> {
        validate_room_id(room_id)?;
        validate_source_url(input_url, &["rtmp", "rtmps"])?;

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        {
            let mut children = self.children.lock();
            if children.contains_key(room_id) {
                return Ok(());
            }
            if children.len() >= self.config.max_concurrent {
                return Err(SupervisorError::CapacityExceeded(children.len()));
            }
            children.insert(
                room_id.to_string(),
                ChildHandle {
                    input: input_url.to_string(),
                    started_at: Utc::now(),
                    cancel: cancel.clone(),
                    finished: finished.clone(),
                },
            );
        }

        let room_dir = self.room_dir(room_id);
        if let Err(e) = prepare_output_tree(&room_dir).await {
            self.children.lock().remove(room_id);
            return Err(e);
        }

        let args = build_transcoder_args(input_url);
        let spawned = tokio::process::Command::new(&self.config.ffmpeg_bin)
            .args(&args)
            .current_dir(&room_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.children.lock().remove(room_id);
                return Err(SupervisorError::SpawnFailed(e.to_string()));
            }
        };

        tracing::info!(room_id, input = input_url, pid = child.id(), "transcoder started");
        spawn_waiter(
            Arc::clone(&self.children),
            room_id.to_string(),
            child,
            cancel,
            finished,
            self.config.stop_grace,
            "transcoder",
        );
        Ok(())
    }

    /// Stop the room's transcoder, wait for it to be reaped, then remove
    /// its output tree.
    pub async fn stop(&self, room_id: &str) -> Result<()> {
        stop_child(&self.children, room_id).await?;
        let room_dir = self.room_dir(room_id);
        if let Err(e) = tokio::fs::remove_dir_all(&room_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(room_id, "failed to remove HLS output tree: {e}");
            }
        }
        tracing::info!(room_id, "transcoder stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self, room_id: &str) -> bool {
        self.children.lock().contains_key(room_id)
    }

    #[must_use]
    pub fn status(&self, room_id: &str) -> Option<ChildStatus> {
        status_of(&self.children, room_id)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.children.lock().len()
    }

    /// Delete HLS directories that belong to no known room. Run once at
    /// startup, before any transcoder starts.
    pub async fn sweep_orphans(&self, known_rooms: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.config.hls_base).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if known_rooms.contains(&name) {
                continue;
            }
            tracing::info!(dir = %name, "removing orphaned HLS directory");
            tokio::fs::remove_dir_all(entry.path()).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Stop every child (process shutdown).
    pub async fn stop_all(&self) {
        let rooms: Vec<String> = self.children.lock().keys().cloned().collect();
        for room_id in rooms {
            let _ = self.stop(&room_id).await;
        }
    }
}

async fn prepare_output_tree(room_dir: &Path) -> Result<()> {
    for (variant, _, _, _) in VARIANTS {
        tokio::fs::create_dir_all(room_dir.join(variant.to_string())).await?;
    }
    Ok(())
}

/// Argument vector for the ABR ladder. Output paths are relative to the
/// room directory (the child's working directory), so the variant
/// playlists land in `{room}/{variant}/stream.m3u8` and the master next
/// to them.
fn build_transcoder_args(input_url: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-i".to_string(),
        input_url.to_string(),
        "-filter_complex".to_string(),
        "[0:v]split=3[v0][v1][v2];\
         [v0]scale=w=-2:h=1080[v0out];\
         [v1]scale=w=-2:h=720[v1out];\
         [v2]scale=w=-2:h=480[v2out]"
            .to_string(),
    ];

    for (variant, _, video_bitrate, audio_bitrate) in VARIANTS {
        args.extend([
            "-map".to_string(),
            format!("[v{variant}out]"),
            format!("-c:v:{variant}"),
            "libx264".to_string(),
            format!("-b:v:{variant}"),
            video_bitrate.to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-g".to_string(),
            "48".to_string(),
            "-sc_threshold".to_string(),
            "0".to_string(),
            "-map".to_string(),
            "a:0".to_string(),
            format!("-c:a:{variant}"),
            "aac".to_string(),
            format!("-b:a:{variant}"),
            audio_bitrate.to_string(),
        ]);
    }

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        "4".to_string(),
        "-hls_list_size".to_string(),
        "6".to_string(),
        "-hls_flags".to_string(),
        "delete_segments+independent_segments".to_string(),
        "-hls_segment_filename".to_string(),
        "%v/seg_%03d.ts".to_string(),
        "-master_pl_name".to_string(),
        "master.m3u8".to_string(),
        "-var_stream_map".to_string(),
        "v:0,a:0 v:1,a:1 v:2,a:2".to_string(),
        "%v/stream.m3u8".to_string(),
    ]);
    args
}
