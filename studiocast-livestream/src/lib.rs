//! FFmpeg process supervision for camera ingest and HLS transcoding.
//!
//! Two supervisors share one pattern: at most one child per room, tracked
//! in a mutex-guarded table, started from hardened argument vectors and
//! stopped with SIGTERM, a bounded grace wait, then SIGKILL. Neither
//! supervisor restarts children; an unexpected exit is logged and the slot
//! is freed.

pub mod hls;
pub mod ingest;
pub mod keys;
pub mod transcoder;

mod child;

pub use hls::{hls_ready, wait_for_hls_ready};
pub use ingest::{IngestConfig, IngestSupervisor};
pub use transcoder::{TranscoderConfig, TranscoderSupervisor};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("invalid stream key: {0}")]
    InvalidKey(String),

    #[error("invalid source URL: {0}")]
    InvalidSource(String),

    #[error("transcoder capacity reached ({0} active)")]
    CapacityExceeded(usize),

    #[error("no process running for room {0}")]
    NotRunning(String),

    #[error("failed to spawn ffmpeg: {0}")]
    SpawnFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Point-in-time view of one supervised child.
#[derive(Debug, Clone)]
pub struct ChildStatus {
    pub running: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub input: String,
}
