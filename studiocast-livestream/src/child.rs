//! Shared child bookkeeping for both supervisors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{ChildStatus, Result, SupervisorError};

pub(crate) struct ChildHandle {
    pub input: String,
    pub started_at: DateTime<Utc>,
    /// Cancelling asks the waiter task to terminate the child.
    pub cancel: CancellationToken,
    /// Latched by the waiter once the child is reaped and the slot freed.
    pub finished: CancellationToken,
}

pub(crate) type ChildTable = Arc<Mutex<HashMap<String, ChildHandle>>>;

/// Spawn the waiter task owning `child`. It reaps the process on
/// unexpected exit or terminates it on cancellation, then frees the
/// room's slot and latches `finished`.
pub(crate) fn spawn_waiter(
    table: ChildTable,
    room_id: String,
    mut child: tokio::process::Child,
    cancel: CancellationToken,
    finished: CancellationToken,
    grace: Duration,
    kind: &'static str,
) {
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => tracing::warn!(
                    room_id = %room_id,
                    kind,
                    code = status.code(),
                    "child exited unexpectedly"
                ),
                Err(e) => tracing::error!(room_id = %room_id, kind, "child wait failed: {e}"),
            },
            () = cancel.cancelled() => terminate(&mut child, grace, kind, &room_id).await,
        }
        table.lock().remove(&room_id);
        finished.cancel();
    });
}

/// SIGTERM, bounded grace wait, then SIGKILL.
async fn terminate(child: &mut tokio::process::Child, grace: Duration, kind: &str, room_id: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => tracing::debug!(room_id, kind, "child stopped within grace"),
        Err(_) => {
            tracing::warn!(room_id, kind, "child ignored SIGTERM, killing");
            let _ = child.kill().await;
        }
    }
}

/// Ask the waiter to terminate the room's child and wait until the slot
/// is freed.
pub(crate) async fn stop_child(table: &ChildTable, room_id: &str) -> Result<()> {
    let (cancel, finished) = {
        let table = table.lock();
        let handle = table
            .get(room_id)
            .ok_or_else(|| SupervisorError::NotRunning(room_id.to_string()))?;
        (handle.cancel.clone(), handle.finished.clone())
    };
    cancel.cancel();
    finished.cancelled().await;
    Ok(())
}

pub(crate) fn status_of(table: &ChildTable, room_id: &str) -> Option<ChildStatus> {
    table.lock().get(room_id).map(|h| ChildStatus {
        running: true,
        started_at: h.started_at,
        input: h.input.clone(),
    })
}
