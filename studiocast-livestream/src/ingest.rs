//! RTSP camera to RTMP origin ingest supervisor.
//!
//! One FFmpeg child per room, stream-copying the camera feed into the
//! origin. The camera's codecs are passed through untouched; the
//! transcoder picks the stream up again on the RTMP side.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::child::{spawn_waiter, status_of, stop_child, ChildHandle, ChildTable};
use crate::keys::{validate_room_id, validate_source_url, validate_stream_key};
use crate::{ChildStatus, Result, SupervisorError};

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub ffmpeg_bin: String,
    pub stop_grace: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            stop_grace: Duration::from_secs(5),
        }
    }
}

pub struct IngestSupervisor {
    config: IngestConfig,
    children: ChildTable,
}

impl IngestSupervisor {
    #[must_use]
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pull `rtsp_url` and push it to `rtmp_url`. Starting an already
    /// ingesting room is an idempotent no-op.
    pub async fn start(&self, room_id: &str, rtsp_url: &str, rtmp_url: &str) -> Result<()> {
        validate_room_id(room_id)?;
        validate_source_url(rtsp_url, &["rtsp", "rtsps"])?;
        validate_source_url(rtmp_url, &["rtmp", "rtmps"])?;
        if let Some(key) = rtmp_url.rsplit('/').next() {
            validate_stream_key(key)?;
        }

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        {
            let mut children = self.children.lock();
            if children.contains_key(room_id) {
                return Ok(());
            }
            children.insert(
                room_id.to_string(),
                ChildHandle {
                    input: rtsp_url.to_string(),
                    started_at: Utc::now(),
                    cancel: cancel.clone(),
                    finished: finished.clone(),
                },
            );
        }

        let args = build_ingest_args(rtsp_url, rtmp_url);
        let spawned = tokio::process::Command::new(&self.config.ffmpeg_bin)
            .args(&args)
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

        tracing::info!(room_id, input = rtsp_url, pid = child.id(), "ingest started");
        spawn_waiter(
            Arc::clone(&self.children),
            room_id.to_string(),
            child,
            cancel,
            finished,
            self.config.stop_grace,
            "ingest",
        );
        Ok(())
    }

    /// Stop the room's ingest child and wait for it to be reaped.
    pub async fn stop(&self, room_id: &str) -> Result<()> {
        stop_child(&self.children, room_id).await?;
        tracing::info!(room_id, "ingest stopped");
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

    /// Stop every child (process shutdown).
    pub async fn stop_all(&self) {
        let rooms: Vec<String> = self.children.lock().keys().cloned().collect();
        for room_id in rooms {
            let _ = self.stop(&room_id).await;
        }
    }
}

/// Argument vector for the RTSP to RTMP copy. URLs are single elements;
/// no shell is ever involved.
fn build_ingest_args(rtsp_url: &str, rtmp_url: &str) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-rtsp_transport".to_string(),
        "tcp".to_string(),
        "-i".to_string(),
        rtsp_url.to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "flv".to_string(),
        rtmp_url.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_hostile_inputs_without_spawning() {
        let supervisor = IngestSupervisor::new(IngestConfig::default());

        let result = supervisor
            .start("..", "rtsp://cam.local/1", "rtmp://origin/live/key")
            .await;
        assert!(matches!(result, Err(SupervisorError::InvalidRoomId(_))));

        let result = supervisor
            .start("1", "rtsp://cam.local/1", "rtmp://origin/live/k;rm -rf")
            .await;
        assert!(result.is_err());

        let result = supervisor
            .start("1", "file:///etc/passwd", "rtmp://origin/live/key")
            .await;
        assert!(matches!(result, Err(SupervisorError::InvalidSource(_))));

        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_unknown_room() {
        let supervisor = IngestSupervisor::new(IngestConfig::default());
        assert!(matches!(
            supervisor.stop("7").await,
            Err(SupervisorError::NotRunning(_))
        ));
    }

    #[test]
    fn test_argv_passes_urls_as_single_elements() {
        let args = build_ingest_args("rtsp://cam.local:554/s1", "rtmp://origin/live/abc");
        assert!(args.contains(&"rtsp://cam.local:554/s1".to_string()));
        assert_eq!(args.last(), Some(&"rtmp://origin/live/abc".to_string()));
        // Nothing resembling shell interpolation.
        assert!(args.iter().all(|a| !a.contains(' ') && !a.contains(';')));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg on PATH"]
    async fn test_start_stop_real_child() {
        let supervisor = IngestSupervisor::new(IngestConfig::default());
        supervisor
            .start("1", "rtsp://127.0.0.1:8554/test", "rtmp://127.0.0.1/live/abc")
            .await
            .expect("spawn");
        assert!(supervisor.is_running("1"));
        supervisor.stop("1").await.expect("stop");
        assert!(!supervisor.is_running("1"));
    }
}
