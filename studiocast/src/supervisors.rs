//! Adapters wiring the livestream supervisors into the control seams the
//! core services define.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use studiocast_core::service::{CameraControl, TranscoderControl};
use studiocast_core::Error;
use studiocast_livestream::{
    IngestSupervisor, SupervisorError, TranscoderSupervisor,
};

fn map_supervisor_err(err: SupervisorError) -> Error {
    match err {
        SupervisorError::InvalidRoomId(msg) => Error::InvalidArgument(format!("room id: {msg}")),
        SupervisorError::InvalidKey(msg) => Error::InvalidArgument(format!("stream key: {msg}")),
        SupervisorError::InvalidSource(msg) => Error::InvalidArgument(format!("source: {msg}")),
        SupervisorError::CapacityExceeded(active) => {
            Error::Capacity(format!("{active} transcoders already running"))
        }
        SupervisorError::NotRunning(room) => Error::NotFound(format!("process for room {room}")),
        SupervisorError::SpawnFailed(msg) => Error::SpawnFailed(msg),
        SupervisorError::Io(e) => Error::Internal(format!("supervisor I/O: {e}")),
    }
}

/// Transcoder seam backed by the real FFmpeg supervisor.
pub struct TranscoderBridge {
    supervisor: Arc<TranscoderSupervisor>,
    hls_base: PathBuf,
}

impl TranscoderBridge {
    pub fn new(supervisor: Arc<TranscoderSupervisor>, hls_base: PathBuf) -> Self {
        Self {
            supervisor,
            hls_base,
        }
    }
}

#[async_trait]
impl TranscoderControl for TranscoderBridge {
    async fn start(&self, room_id: &str, input_url: &str) -> studiocast_core::Result<()> {
        self.supervisor
            .start(room_id, input_url)
            .await
            .map_err(map_supervisor_err)
    }

    async fn stop(&self, room_id: &str) -> studiocast_core::Result<()> {
        self.supervisor.stop(room_id).await.map_err(map_supervisor_err)
    }

    fn is_running(&self, room_id: &str) -> bool {
        self.supervisor.is_running(room_id)
    }

    fn active_count(&self) -> usize {
        self.supervisor.active_count()
    }

    async fn hls_ready(&self, room_id: &str) -> bool {
        studiocast_livestream::hls_ready(&self.hls_base, room_id).await
    }
}

/// Camera seam for the scheduler: start/stop drive the RTSP ingest child,
/// while liveness reflects the transcoder so decisions follow what
/// viewers can actually watch.
pub struct CameraBridge {
    ingest: Arc<IngestSupervisor>,
    transcoder: Arc<TranscoderSupervisor>,
}

impl CameraBridge {
    pub fn new(ingest: Arc<IngestSupervisor>, transcoder: Arc<TranscoderSupervisor>) -> Self {
        Self { ingest, transcoder }
    }
}

#[async_trait]
impl CameraControl for CameraBridge {
    async fn start_camera(
        &self,
        room_id: &str,
        rtsp_url: &str,
        rtmp_url: &str,
    ) -> studiocast_core::Result<()> {
        self.ingest
            .start(room_id, rtsp_url, rtmp_url)
            .await
            .map_err(map_supervisor_err)
    }

    async fn stop_camera(&self, room_id: &str) -> studiocast_core::Result<()> {
        self.ingest.stop(room_id).await.map_err(map_supervisor_err)
    }

    fn is_live(&self, room_id: &str) -> bool {
        self.transcoder.is_running(room_id) || self.ingest.is_running(room_id)
    }
}
