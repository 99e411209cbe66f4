//! RTMP publish lifecycle bridge.
//!
//! The RTMP origin calls in on publish and unpublish. Publish validates
//! the stream key against the lookup bucket, flips `Room.is_active`,
//! opens a Stream audit row, asks the transcoder supervisor for an ABR
//! ladder and tells SSE subscribers the room is online. A transcoder
//! start failure is logged but never rejects the publish; the origin can
//! still serve the raw stream.
//!
//! `Room.is_active` mirrors the origin's callback state, so on process
//! start every room is forced offline and dangling Stream rows are
//! closed; the origin re-issues `on_publish` for anything still live.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{Room, Stream, StudioAnalytics};
use crate::service::analytics::AnalyticsService;
use crate::service::hub::EventHub;
use crate::store::buckets::*;
use crate::store::Store;
use crate::{Error, Result};

/// Seam to the transcoder supervisor. Implemented by the binary over the
/// livestream crate so core stays process-agnostic.
#[async_trait]
pub trait TranscoderControl: Send + Sync {
    async fn start(&self, room_id: &str, input_url: &str) -> Result<()>;
    async fn stop(&self, room_id: &str) -> Result<()>;
    fn is_running(&self, room_id: &str) -> bool;
    fn active_count(&self) -> usize;
    /// Can a client load the room's master playlist without racing the
    /// transcoder's first flush?
    async fn hls_ready(&self, room_id: &str) -> bool;
}

/// Seam to the camera ingest supervisor, used by the scheduler.
/// `is_live` reports the transcoder's view of the room so schedule
/// decisions track actual liveness, not just the camera child.
#[async_trait]
pub trait CameraControl: Send + Sync {
    async fn start_camera(&self, room_id: &str, rtsp_url: &str, rtmp_url: &str) -> Result<()>;
    async fn stop_camera(&self, room_id: &str) -> Result<()>;
    fn is_live(&self, room_id: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    pub rooms_deactivated: usize,
    pub streams_closed: usize,
}

pub struct StreamLifecycleService {
    store: Arc<Store>,
    hub: Arc<EventHub>,
    analytics: Arc<AnalyticsService>,
    transcoder: Arc<dyn TranscoderControl>,
    /// Origin base, e.g. "rtmp://127.0.0.1:1935"; transcoder input is
    /// `{base}/live/{stream_key}`.
    srs_rtmp_base: String,
}

impl StreamLifecycleService {
    pub fn new(
        store: Arc<Store>,
        hub: Arc<EventHub>,
        analytics: Arc<AnalyticsService>,
        transcoder: Arc<dyn TranscoderControl>,
        srs_rtmp_base: String,
    ) -> Self {
        Self {
            store,
            hub,
            analytics,
            transcoder,
            srs_rtmp_base,
        }
    }

    /// Handle the origin's publish callback. Returns the room id on accept.
    pub async fn on_publish(
        &self,
        stream_key: &str,
        client_ip: &str,
        client_id: &str,
    ) -> Result<u64> {
        if stream_key.is_empty() {
            return Err(Error::invalid("empty stream key"));
        }

        let room_id = self.store.with_write(|tx| {
            let room_id = tx
                .room_by_stream_key(stream_key)?
                .ok_or_else(|| Error::not_found("stream key"))?;
            let mut room: Room = tx
                .get(&ROOMS, room_id)?
                .ok_or_else(|| Error::not_found("room"))?;
            room.is_active = true;
            tx.put(&ROOMS, room_id, &room)?;

            let stream_id = tx.next_id(&STREAMS)?;
            let stream = Stream {
                id: stream_id,
                room_id,
                studio_id: room.studio_id,
                stream_key: stream_key.to_string(),
                started_at: Utc::now(),
                ended_at: None,
            };
            tx.put(&STREAMS, stream_id, &stream)?;
            tx.link(&STREAMS_BY_ROOM, room_id, stream_id)?;
            tx.link(&STREAMS_BY_STUDIO, room.studio_id, stream_id)?;
            Ok(room_id)
        })?;

        tracing::info!(room_id, client_ip, client_id, "publish accepted");
        self.analytics.startup_attempt(room_id, true)?;

        // ABR is best-effort: the stream is watchable without it.
        let input_url = format!("{}/live/{stream_key}", self.srs_rtmp_base);
        if let Err(e) = self
            .transcoder
            .start(&room_id.to_string(), &input_url)
            .await
        {
            tracing::warn!(room_id, "transcoder start failed, continuing without ABR: {e}");
        }

        self.hub.broadcast_room_status(room_id, true);
        Ok(room_id)
    }

    /// Handle the origin's unpublish callback.
    pub async fn on_unpublish(&self, stream_key: &str) -> Result<u64> {
        if stream_key.is_empty() {
            return Err(Error::invalid("empty stream key"));
        }

        let room_id = self.store.with_write(|tx| {
            let room_id = tx
                .room_by_stream_key(stream_key)?
                .ok_or_else(|| Error::not_found("stream key"))?;
            let mut room: Room = tx
                .get(&ROOMS, room_id)?
                .ok_or_else(|| Error::not_found("room"))?;
            room.is_active = false;
            tx.put(&ROOMS, room_id, &room)?;

            let now = Utc::now();
            for stream_id in tx.targets(&STREAMS_BY_ROOM, room_id)? {
                if let Some(mut stream) = tx.get::<_, Stream>(&STREAMS, stream_id)? {
                    if stream.ended_at.is_none() {
                        stream.ended_at = Some(now);
                        tx.put(&STREAMS, stream_id, &stream)?;
                    }
                }
            }
            Ok(room_id)
        })?;

        tracing::info!(room_id, "publish ended");
        if let Err(e) = self.transcoder.stop(&room_id.to_string()).await {
            tracing::debug!(room_id, "transcoder stop: {e}");
        }
        self.hub.broadcast_room_status(room_id, false);
        Ok(room_id)
    }

    /// Post-crash recovery, run once at startup before accepting hooks.
    ///
    /// Forces every room offline, closes Stream rows left open by a missed
    /// `on_unpublish`, and recomputes the studio analytics rollups.
    pub fn startup_recovery(&self) -> Result<RecoveryReport> {
        let report = self.store.with_write(|tx| {
            let mut report = RecoveryReport::default();

            let mut active_rooms = Vec::new();
            tx.for_each(&ROOMS, |room_id, room: Room| {
                if room.is_active {
                    active_rooms.push((room_id, room));
                }
                true
            })?;
            for (room_id, mut room) in active_rooms {
                room.is_active = false;
                tx.put(&ROOMS, room_id, &room)?;
                report.rooms_deactivated += 1;
            }

            let now = Utc::now();
            let mut open_streams = Vec::new();
            tx.for_each(&STREAMS, |stream_id, stream: Stream| {
                if stream.ended_at.is_none() {
                    open_streams.push((stream_id, stream));
                }
                true
            })?;
            for (stream_id, mut stream) in open_streams {
                stream.ended_at = Some(now);
                tx.put(&STREAMS, stream_id, &stream)?;
                report.streams_closed += 1;
            }
            Ok(report)
        })?;

        // Rollups can be recomputed outside the recovery transaction.
        let studio_ids = self.store.with_read(|tx| {
            let mut ids = Vec::new();
            tx.for_each(&STUDIOS, |id, _: crate::models::Studio| {
                ids.push(id);
                true
            })?;
            Ok(ids)
        })?;
        for studio_id in studio_ids {
            let _: StudioAnalytics = self.analytics.recompute_studio(studio_id)?;
        }

        if report.rooms_deactivated > 0 || report.streams_closed > 0 {
            tracing::info!(
                rooms = report.rooms_deactivated,
                streams = report.streams_closed,
                "startup recovery reset live state"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::studio::StudioService;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Transcoder double tracking start/stop calls.
    #[derive(Default)]
    struct FakeTranscoder {
        running: Mutex<HashSet<String>>,
        fail_start: Mutex<bool>,
    }

    #[async_trait]
    impl TranscoderControl for FakeTranscoder {
        async fn start(&self, room_id: &str, _input_url: &str) -> Result<()> {
            if *self.fail_start.lock() {
                return Err(Error::SpawnFailed("ffmpeg unavailable".to_string()));
            }
            self.running.lock().insert(room_id.to_string());
            Ok(())
        }

        async fn stop(&self, room_id: &str) -> Result<()> {
            if !self.running.lock().remove(room_id) {
                return Err(Error::not_found("transcoder"));
            }
            Ok(())
        }

        fn is_running(&self, room_id: &str) -> bool {
            self.running.lock().contains(room_id)
        }

        fn active_count(&self) -> usize {
            self.running.lock().len()
        }

        async fn hls_ready(&self, room_id: &str) -> bool {
            self.is_running(room_id)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<Store>,
        hub: Arc<EventHub>,
        transcoder: Arc<FakeTranscoder>,
        lifecycle: StreamLifecycleService,
        studios: StudioService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(dir.path().join("test.redb")).expect("open"));
        let hub = Arc::new(EventHub::new());
        let analytics = Arc::new(AnalyticsService::new(Arc::clone(&store), Arc::clone(&hub)));
        let transcoder = Arc::new(FakeTranscoder::default());
        let lifecycle = StreamLifecycleService::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            analytics,
            Arc::clone(&transcoder) as Arc<dyn TranscoderControl>,
            "rtmp://127.0.0.1:1935".to_string(),
        );
        let studios = StudioService::new(Arc::clone(&store));
        Fixture {
            _dir: dir,
            store,
            hub,
            transcoder,
            lifecycle,
            studios,
        }
    }

    fn seed_room(fx: &Fixture) -> Room {
        let user = fx
            .studios
            .create_user("Pat".to_string(), "pat@example.com".to_string())
            .expect("user");
        let studio = fx
            .studios
            .create_studio(user.id, "Main".to_string(), String::new(), None)
            .expect("studio");
        fx.studios
            .create_room(studio.id, 101, "Room A".to_string())
            .expect("room")
    }

    #[tokio::test]
    async fn test_publish_happy_path() {
        let fx = fixture();
        let room = seed_room(&fx);
        let (_guard, mut rx) = fx.hub.subscribe(room.id, None, None);

        let room_id = fx
            .lifecycle
            .on_publish(&room.stream_key, "203.0.113.7", "client-1")
            .await
            .expect("accept");
        assert_eq!(room_id, room.id);

        let reloaded = fx.studios.get_room(room.id).expect("read").expect("present");
        assert!(reloaded.is_active);
        assert_eq!(fx.transcoder.active_count(), 1);
        assert_eq!(
            rx.recv().await,
            Some(crate::service::hub::HubEvent::RoomStatus {
                room_id: room.id,
                is_active: true
            })
        );

        // Stream audit row is open.
        let open = fx
            .store
            .with_read(|tx| {
                let ids = tx.targets(&STREAMS_BY_ROOM, room.id)?;
                let mut open = 0;
                for id in ids {
                    if let Some(s) = tx.get::<_, Stream>(&STREAMS, id)? {
                        if s.ended_at.is_none() {
                            open += 1;
                        }
                    }
                }
                Ok(open)
            })
            .expect("scan");
        assert_eq!(open, 1);
    }

    #[tokio::test]
    async fn test_publish_unknown_key_rejected() {
        let fx = fixture();
        let room = seed_room(&fx);
        let result = fx.lifecycle.on_publish("ghost", "203.0.113.7", "c").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(matches!(
            fx.lifecycle.on_publish("", "203.0.113.7", "c").await,
            Err(Error::InvalidArgument(_))
        ));

        let reloaded = fx.studios.get_room(room.id).expect("read").expect("present");
        assert!(!reloaded.is_active);
        assert_eq!(fx.transcoder.active_count(), 0);
    }

    #[tokio::test]
    async fn test_transcoder_failure_does_not_reject_publish() {
        let fx = fixture();
        let room = seed_room(&fx);
        *fx.transcoder.fail_start.lock() = true;

        let room_id = fx
            .lifecycle
            .on_publish(&room.stream_key, "203.0.113.7", "c")
            .await
            .expect("still accepted");
        assert_eq!(room_id, room.id);
        let reloaded = fx.studios.get_room(room.id).expect("read").expect("present");
        assert!(reloaded.is_active);
    }

    #[tokio::test]
    async fn test_unpublish_closes_stream_and_room() {
        let fx = fixture();
        let room = seed_room(&fx);
        fx.lifecycle
            .on_publish(&room.stream_key, "203.0.113.7", "c")
            .await
            .expect("accept");

        let (_guard, mut rx) = fx.hub.subscribe(room.id, None, None);
        fx.lifecycle
            .on_unpublish(&room.stream_key)
            .await
            .expect("unpublish");

        let reloaded = fx.studios.get_room(room.id).expect("read").expect("present");
        assert!(!reloaded.is_active);
        assert_eq!(fx.transcoder.active_count(), 0);
        assert_eq!(
            rx.recv().await,
            Some(crate::service::hub::HubEvent::RoomStatus {
                room_id: room.id,
                is_active: false
            })
        );

        let open = fx
            .store
            .with_read(|tx| {
                let ids = tx.targets(&STREAMS_BY_ROOM, room.id)?;
                let mut open = 0;
                for id in ids {
                    if let Some(s) = tx.get::<_, Stream>(&STREAMS, id)? {
                        if s.ended_at.is_none() {
                            open += 1;
                        }
                    }
                }
                Ok(open)
            })
            .expect("scan");
        assert_eq!(open, 0);
    }

    #[tokio::test]
    async fn test_startup_recovery_resets_state() {
        let fx = fixture();
        let room = seed_room(&fx);
        fx.lifecycle
            .on_publish(&room.stream_key, "203.0.113.7", "c")
            .await
            .expect("accept");

        // Simulate a crash: no unpublish ever arrives.
        let report = fx.lifecycle.startup_recovery().expect("recovery");
        assert_eq!(report.rooms_deactivated, 1);
        assert_eq!(report.streams_closed, 1);

        let reloaded = fx.studios.get_room(room.id).expect("read").expect("present");
        assert!(!reloaded.is_active);

        // Idempotent on a clean state.
        let report = fx.lifecycle.startup_recovery().expect("recovery");
        assert_eq!(report.rooms_deactivated, 0);
        assert_eq!(report.streams_closed, 0);
    }
}
