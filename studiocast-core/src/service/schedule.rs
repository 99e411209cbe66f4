//! Class schedule evaluation and camera automation.
//!
//! A 30-second ticker walks the active schedules, computes each one's
//! effective window (pre-roll before, post-roll after, recurring windows
//! resolved in the schedule's timezone) and decides whether to start or
//! stop the room's camera. Stops are suppressed while any other active
//! schedule for the same room still covers the current instant, so
//! back-to-back classes hand the camera over instead of cycling it.
//!
//! Evaluation runs under a read transaction; execution results are logged
//! in separate write transactions so a long evaluation never blocks
//! writers. The duplicate-suppression cache is process-local by design:
//! after a restart the `is_live` check and the execution log converge on
//! the correct state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::models::{CameraConfig, ClassSchedule, Room, ScheduleAction, ScheduleExecutionLog};
use crate::service::stream_lifecycle::CameraControl;
use crate::store::buckets::*;
use crate::store::Store;
use crate::{Error, Result};

/// Re-execution guard for one `(schedule, action)` pair, in seconds.
pub const DUPLICATE_ACTION_WINDOW_SECS: i64 = 60;

fn duplicate_action_window() -> Duration {
    Duration::seconds(DUPLICATE_ACTION_WINDOW_SECS)
}

/// A schedule's effective on-air window, pre/post-roll included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScheduleWindow {
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Compute the window of `schedule` relative to `now`. `None` means the
/// schedule does not apply right now (wrong weekday, outside its date
/// bounds, or unparseable definition).
#[must_use]
pub fn compute_window(schedule: &ClassSchedule, now: DateTime<Utc>) -> Option<ScheduleWindow> {
    if schedule.is_recurring {
        recurring_window(schedule, now)
    } else {
        let start = schedule.start_time?;
        let end = schedule.end_time?;
        Some(ScheduleWindow {
            start: start - Duration::minutes(schedule.pre_roll_minutes),
            end: end + Duration::minutes(schedule.post_roll_minutes),
        })
    }
}

fn recurring_window(schedule: &ClassSchedule, now: DateTime<Utc>) -> Option<ScheduleWindow> {
    let tz: chrono_tz::Tz = schedule.recur_timezone.parse().ok()?;
    let local = now.with_timezone(&tz);
    let today = local.date_naive();

    if let Some(from) = schedule.recur_start_date {
        if today < from {
            return None;
        }
    }
    if let Some(to) = schedule.recur_end_date {
        if today > to {
            return None;
        }
    }
    let weekday = chrono::Datelike::weekday(&local).num_days_from_sunday() as u8;
    if !schedule.recur_weekdays.contains(&weekday) {
        return None;
    }

    let time_start = NaiveTime::parse_from_str(&schedule.recur_time_start, "%H:%M").ok()?;
    let time_end = NaiveTime::parse_from_str(&schedule.recur_time_end, "%H:%M").ok()?;
    // `earliest` resolves DST gaps/overlaps deterministically.
    let start_local = tz.from_local_datetime(&today.and_time(time_start)).earliest()?;
    let end_local = tz.from_local_datetime(&today.and_time(time_end)).earliest()?;

    Some(ScheduleWindow {
        start: start_local.with_timezone(&Utc) - Duration::minutes(schedule.pre_roll_minutes),
        end: end_local.with_timezone(&Utc) + Duration::minutes(schedule.post_roll_minutes),
    })
}

struct PlannedAction {
    schedule_id: u64,
    room_id: u64,
    action: ScheduleAction,
}

pub struct SchedulerService {
    store: Arc<Store>,
    camera: Arc<dyn CameraControl>,
    srs_rtmp_base: String,
    /// "{schedule_id}:{action}" -> last execution attempt.
    recent_actions: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SchedulerService {
    pub fn new(store: Arc<Store>, camera: Arc<dyn CameraControl>, srs_rtmp_base: String) -> Self {
        Self {
            store,
            camera,
            srs_rtmp_base,
            recent_actions: Mutex::new(HashMap::new()),
        }
    }

    // ---- schedule CRUD -----------------------------------------------

    /// Persist a new schedule. The id field is assigned here.
    pub fn create_schedule(&self, mut schedule: ClassSchedule) -> Result<ClassSchedule> {
        validate_schedule(&schedule)?;
        self.store.with_write(|tx| {
            if tx.get::<_, Room>(&ROOMS, schedule.room_id)?.is_none() {
                return Err(Error::not_found("room"));
            }
            schedule.id = tx.next_id(&SCHEDULES)?;
            tx.put(&SCHEDULES, schedule.id, &schedule)?;
            tx.link(&SCHEDULES_BY_ROOM, schedule.room_id, schedule.id)?;
            Ok(schedule.clone())
        })
    }

    pub fn update_schedule(&self, schedule: ClassSchedule) -> Result<ClassSchedule> {
        validate_schedule(&schedule)?;
        self.store.with_write(|tx| {
            let existing: ClassSchedule = tx
                .get(&SCHEDULES, schedule.id)?
                .ok_or_else(|| Error::not_found("schedule"))?;
            if existing.room_id != schedule.room_id {
                tx.unlink(&SCHEDULES_BY_ROOM, existing.room_id, schedule.id)?;
                tx.link(&SCHEDULES_BY_ROOM, schedule.room_id, schedule.id)?;
            }
            tx.put(&SCHEDULES, schedule.id, &schedule)?;
            Ok(schedule.clone())
        })
    }

    pub fn delete_schedule(&self, schedule_id: u64) -> Result<()> {
        self.store.with_write(|tx| {
            let schedule: ClassSchedule = tx
                .get(&SCHEDULES, schedule_id)?
                .ok_or_else(|| Error::not_found("schedule"))?;
            for log_id in tx.targets(&LOGS_BY_SCHEDULE, schedule_id)? {
                if let Some(log) = tx.get::<_, ScheduleExecutionLog>(&SCHEDULE_LOGS, log_id)? {
                    tx.unlink(&LOGS_BY_ROOM, log.room_id, log_id)?;
                }
                tx.delete(&SCHEDULE_LOGS, log_id)?;
            }
            tx.unlink_all(&LOGS_BY_SCHEDULE, schedule_id)?;
            tx.unlink(&SCHEDULES_BY_ROOM, schedule.room_id, schedule_id)?;
            tx.delete(&SCHEDULES, schedule_id)?;
            Ok(())
        })
    }

    pub fn get_schedule(&self, schedule_id: u64) -> Result<Option<ClassSchedule>> {
        self.store.with_read(|tx| tx.get(&SCHEDULES, schedule_id))
    }

    pub fn schedules_for_room(&self, room_id: u64) -> Result<Vec<ClassSchedule>> {
        self.store.with_read(|tx| {
            let mut schedules = Vec::new();
            for id in tx.targets(&SCHEDULES_BY_ROOM, room_id)? {
                if let Some(s) = tx.get(&SCHEDULES, id)? {
                    schedules.push(s);
                }
            }
            Ok(schedules)
        })
    }

    pub fn logs_for_schedule(&self, schedule_id: u64) -> Result<Vec<ScheduleExecutionLog>> {
        self.store.with_read(|tx| {
            let mut logs = Vec::new();
            for id in tx.targets(&LOGS_BY_SCHEDULE, schedule_id)? {
                if let Some(log) = tx.get(&SCHEDULE_LOGS, id)? {
                    logs.push(log);
                }
            }
            Ok(logs)
        })
    }

    pub fn logs_for_room(&self, room_id: u64) -> Result<Vec<ScheduleExecutionLog>> {
        self.store.with_read(|tx| {
            let mut logs = Vec::new();
            for id in tx.targets(&LOGS_BY_ROOM, room_id)? {
                if let Some(log) = tx.get(&SCHEDULE_LOGS, id)? {
                    logs.push(log);
                }
            }
            Ok(logs)
        })
    }

    // ---- evaluation --------------------------------------------------

    pub async fn run_tick(&self) -> Result<()> {
        self.run_tick_at(Utc::now()).await
    }

    async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<()> {
        // One evaluation read for the schedule set; every execution result
        // is logged in its own write transaction afterwards.
        let schedules = self.store.with_read(|tx| {
            let mut schedules: Vec<ClassSchedule> = Vec::new();
            tx.for_each(&SCHEDULES, |_, s: ClassSchedule| {
                if s.is_active {
                    schedules.push(s);
                }
                true
            })?;
            Ok(schedules)
        })?;

        // Sequential so an action taken for one schedule is visible to the
        // liveness checks of the schedules evaluated after it.
        for schedule in &schedules {
            let Some(window) = compute_window(schedule, now) else {
                continue;
            };
            let live = self.camera.is_live(&schedule.room_id.to_string());

            let action = if schedule.auto_start_camera && window.contains(now) {
                if live {
                    Some(ScheduleAction::SkipAlreadyRunning)
                } else {
                    Some(ScheduleAction::StartCamera)
                }
            } else if schedule.auto_stop_camera && live && now > window.end {
                // Another active schedule still covering this room keeps
                // the camera rolling across class boundaries.
                let overlapping = schedules.iter().any(|other| {
                    other.id != schedule.id
                        && other.room_id == schedule.room_id
                        && compute_window(other, now).is_some_and(|w| w.contains(now))
                });
                if overlapping {
                    None
                } else {
                    Some(ScheduleAction::StopCamera)
                }
            } else {
                None
            };

            let Some(action) = action else { continue };
            if self.recently_acted(schedule.id, action, now) {
                continue;
            }
            let planned = PlannedAction {
                schedule_id: schedule.id,
                room_id: schedule.room_id,
                action,
            };
            if let Err(e) = self.execute(&planned, now).await {
                tracing::error!(
                    schedule_id = planned.schedule_id,
                    action = planned.action.as_str(),
                    "schedule execution failed: {e}"
                );
            }
        }

        self.prune_recent(now);
        Ok(())
    }

    async fn execute(&self, planned: &PlannedAction, now: DateTime<Utc>) -> Result<()> {
        self.mark_acted(planned.schedule_id, planned.action, now);

        let (success, error_msg) = match planned.action {
            ScheduleAction::SkipAlreadyRunning => (true, String::new()),
            ScheduleAction::StartCamera => {
                let lookup = self.store.with_read(|tx| {
                    Ok((
                        tx.get::<_, CameraConfig>(&CAMERA_CONFIGS, planned.room_id)?,
                        tx.get::<_, Room>(&ROOMS, planned.room_id)?,
                    ))
                })?;
                match lookup {
                    (Some(config), Some(room)) => {
                        let rtmp_url =
                            format!("{}/live/{}", self.srs_rtmp_base, room.stream_key);
                        match self
                            .camera
                            .start_camera(&planned.room_id.to_string(), &config.rtsp_url, &rtmp_url)
                            .await
                        {
                            Ok(()) => (true, String::new()),
                            Err(e) => (false, e.to_string()),
                        }
                    }
                    (None, _) => (false, "no camera configured for room".to_string()),
                    (_, None) => (false, "room not found".to_string()),
                }
            }
            ScheduleAction::StopCamera => {
                let room: Option<Room> = self
                    .store
                    .with_read(|tx| tx.get(&ROOMS, planned.room_id))?;
                if room.is_none() {
                    (false, "room not found".to_string())
                } else {
                    match self.camera.stop_camera(&planned.room_id.to_string()).await {
                        Ok(()) => (true, String::new()),
                        Err(e) => (false, e.to_string()),
                    }
                }
            }
        };

        if success {
            tracing::info!(
                schedule_id = planned.schedule_id,
                room_id = planned.room_id,
                action = planned.action.as_str(),
                "schedule action executed"
            );
        } else {
            tracing::warn!(
                schedule_id = planned.schedule_id,
                room_id = planned.room_id,
                action = planned.action.as_str(),
                error = %error_msg,
                "schedule action failed"
            );
        }

        self.write_log(planned, now, success, error_msg)
    }

    fn write_log(
        &self,
        planned: &PlannedAction,
        now: DateTime<Utc>,
        success: bool,
        error_msg: String,
    ) -> Result<()> {
        self.store.with_write(|tx| {
            let id = tx.next_id(&SCHEDULE_LOGS)?;
            let log = ScheduleExecutionLog {
                id,
                schedule_id: planned.schedule_id,
                room_id: planned.room_id,
                action: planned.action,
                timestamp: now,
                success,
                error_msg: error_msg.clone(),
            };
            tx.put(&SCHEDULE_LOGS, id, &log)?;
            tx.link(&LOGS_BY_SCHEDULE, planned.schedule_id, id)?;
            tx.link(&LOGS_BY_ROOM, planned.room_id, id)?;
            Ok(())
        })
    }

    // ---- duplicate suppression ---------------------------------------

    fn recently_acted(&self, schedule_id: u64, action: ScheduleAction, now: DateTime<Utc>) -> bool {
        let key = format!("{schedule_id}:{}", action.as_str());
        self.recent_actions
            .lock()
            .get(&key)
            .is_some_and(|&t| now - t < duplicate_action_window())
    }

    fn mark_acted(&self, schedule_id: u64, action: ScheduleAction, now: DateTime<Utc>) {
        let key = format!("{schedule_id}:{}", action.as_str());
        self.recent_actions.lock().insert(key, now);
    }

    fn prune_recent(&self, now: DateTime<Utc>) {
        self.recent_actions
            .lock()
            .retain(|_, &mut t| now - t < duplicate_action_window() * 2);
    }

    // ---- ticker ------------------------------------------------------

    pub fn start(
        self: &Arc<Self>,
        tick_seconds: u64,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_seconds));
            interval.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = scheduler.run_tick().await {
                            tracing::error!("scheduler tick failed: {e}");
                        }
                    }
                }
            }
        })
    }
}

fn validate_schedule(schedule: &ClassSchedule) -> Result<()> {
    if schedule.name.trim().is_empty() {
        return Err(Error::invalid("schedule name must not be empty"));
    }
    if schedule.pre_roll_minutes < 0 || schedule.post_roll_minutes < 0 {
        return Err(Error::invalid("pre/post roll must not be negative"));
    }
    if schedule.is_recurring {
        if schedule.recur_weekdays.is_empty() {
            return Err(Error::invalid("recurring schedule needs at least one weekday"));
        }
        if schedule.recur_weekdays.iter().any(|&d| d > 6) {
            return Err(Error::invalid("weekdays must be 0 (Sunday) through 6"));
        }
        NaiveTime::parse_from_str(&schedule.recur_time_start, "%H:%M")
            .map_err(|_| Error::invalid("recur_time_start must be HH:MM"))?;
        NaiveTime::parse_from_str(&schedule.recur_time_end, "%H:%M")
            .map_err(|_| Error::invalid("recur_time_end must be HH:MM"))?;
        schedule
            .recur_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| Error::invalid("recur_timezone must be an IANA zone name"))?;
    } else {
        let (Some(start), Some(end)) = (schedule.start_time, schedule.end_time) else {
            return Err(Error::invalid("one-time schedule needs start and end"));
        };
        if start >= end {
            return Err(Error::invalid("schedule must end after it starts"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::stream_lifecycle::CameraControl;
    use async_trait::async_trait;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeCamera {
        running: Mutex<HashSet<String>>,
        starts: Mutex<u32>,
    }

    #[async_trait]
    impl CameraControl for FakeCamera {
        async fn start_camera(&self, room_id: &str, _rtsp: &str, _rtmp: &str) -> Result<()> {
            // Already-running start is idempotent, like the supervisor.
            if self.running.lock().insert(room_id.to_string()) {
                *self.starts.lock() += 1;
            }
            Ok(())
        }

        async fn stop_camera(&self, room_id: &str) -> Result<()> {
            if !self.running.lock().remove(room_id) {
                return Err(Error::not_found("camera"));
            }
            Ok(())
        }

        fn is_live(&self, room_id: &str) -> bool {
            self.running.lock().contains(room_id)
        }
    }

    fn one_time(id: u64, room_id: u64, start: DateTime<Utc>, end: DateTime<Utc>) -> ClassSchedule {
        ClassSchedule {
            id,
            studio_id: 1,
            room_id,
            name: format!("class {id}"),
            is_recurring: false,
            start_time: Some(start),
            end_time: Some(end),
            recur_weekdays: Vec::new(),
            recur_time_start: String::new(),
            recur_time_end: String::new(),
            recur_timezone: String::new(),
            recur_start_date: None,
            recur_end_date: None,
            pre_roll_minutes: 0,
            post_roll_minutes: 0,
            auto_start_camera: true,
            auto_stop_camera: true,
            is_active: true,
        }
    }

    #[test]
    fn test_one_time_window_applies_rolls() {
        let start = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let mut schedule = one_time(1, 1, start, end);
        schedule.pre_roll_minutes = 10;
        schedule.post_roll_minutes = 15;

        let window = compute_window(&schedule, start).expect("window");
        assert_eq!(window.start, start - Duration::minutes(10));
        assert_eq!(window.end, end + Duration::minutes(15));
        assert!(window.contains(start - Duration::minutes(5)));
        assert!(window.contains(end + Duration::minutes(15)));
        assert!(!window.contains(end + Duration::minutes(16)));
    }

    fn recurring(weekdays: Vec<u8>, tz: &str) -> ClassSchedule {
        ClassSchedule {
            id: 1,
            studio_id: 1,
            room_id: 1,
            name: "yoga".to_string(),
            is_recurring: true,
            start_time: None,
            end_time: None,
            recur_weekdays: weekdays,
            recur_time_start: "09:30".to_string(),
            recur_time_end: "11:00".to_string(),
            recur_timezone: tz.to_string(),
            recur_start_date: None,
            recur_end_date: None,
            pre_roll_minutes: 5,
            post_roll_minutes: 5,
            auto_start_camera: true,
            auto_stop_camera: true,
            is_active: true,
        }
    }

    #[test]
    fn test_recurring_window_in_timezone() {
        // 2026-03-04 is a Wednesday; 15:00 UTC is 10:00 in New York (EST).
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).unwrap();
        let schedule = recurring(vec![3], "America/New_York");

        let window = compute_window(&schedule, now).expect("window");
        // 09:30 EST == 14:30 UTC, minus 5 minutes pre-roll.
        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 3, 4, 14, 25, 0).unwrap());
        // 11:00 EST == 16:00 UTC, plus 5 minutes post-roll.
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 3, 4, 16, 5, 0).unwrap());
        assert!(window.contains(now));
    }

    #[test]
    fn test_recurring_rejects_wrong_weekday_and_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).unwrap();

        // Thursday-only schedule does not apply on a Wednesday.
        assert!(compute_window(&recurring(vec![4], "America/New_York"), now).is_none());

        // Date bounds exclude today.
        let mut schedule = recurring(vec![3], "America/New_York");
        schedule.recur_start_date = Some(chrono::NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
        assert!(compute_window(&schedule, now).is_none());

        let mut schedule = recurring(vec![3], "America/New_York");
        schedule.recur_end_date = Some(chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert!(compute_window(&schedule, now).is_none());

        // Unknown timezone yields no window rather than a panic.
        assert!(compute_window(&recurring(vec![3], "Mars/Olympus"), now).is_none());
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<Store>,
        camera: Arc<FakeCamera>,
        scheduler: SchedulerService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(dir.path().join("test.redb")).expect("open"));
        let camera = Arc::new(FakeCamera::default());
        let scheduler = SchedulerService::new(
            Arc::clone(&store),
            Arc::clone(&camera) as Arc<dyn CameraControl>,
            "rtmp://127.0.0.1:1935".to_string(),
        );
        Fixture {
            _dir: dir,
            store,
            camera,
            scheduler,
        }
    }

    fn seed_room_with_camera(fx: &Fixture, room_id: u64) {
        fx.store
            .with_write(|tx| {
                let room = Room::new(room_id, 1, 101, "Room".to_string());
                tx.put(&ROOMS, room_id, &room)?;
                tx.put(
                    &CAMERA_CONFIGS,
                    room_id,
                    &CameraConfig {
                        room_id,
                        rtsp_url: "rtsp://cam.local/1".to_string(),
                    },
                )?;
                Ok(())
            })
            .expect("seed");
    }

    #[tokio::test]
    async fn test_back_to_back_classes_share_the_camera() {
        let fx = fixture();
        seed_room_with_camera(&fx, 1);

        let nine = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let ten = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let eleven = Utc.with_ymd_and_hms(2026, 3, 4, 11, 0, 0).unwrap();

        let mut class_a = one_time(0, 1, nine, ten);
        class_a.post_roll_minutes = 15;
        let mut class_b = one_time(0, 1, ten, eleven);
        class_b.pre_roll_minutes = 15;
        fx.scheduler.create_schedule(class_a).expect("a");
        let class_b = fx.scheduler.create_schedule(class_b).expect("b");

        // 09:45: both windows cover now; the camera starts exactly once.
        let t = Utc.with_ymd_and_hms(2026, 3, 4, 9, 45, 0).unwrap();
        fx.scheduler.run_tick_at(t).await.expect("tick");
        assert!(fx.camera.is_live("1"));
        assert_eq!(*fx.camera.starts.lock(), 1);

        // 10:20: A's window (ended 10:15) would stop, but B still covers
        // now, so the camera keeps rolling.
        let t = Utc.with_ymd_and_hms(2026, 3, 4, 10, 20, 0).unwrap();
        fx.scheduler.run_tick_at(t).await.expect("tick");
        assert!(fx.camera.is_live("1"));

        // 11:01: both classes are over and nothing covers now; exactly one
        // stop fires for the room.
        let t = Utc.with_ymd_and_hms(2026, 3, 4, 11, 1, 0).unwrap();
        fx.scheduler.run_tick_at(t).await.expect("tick");
        assert!(!fx.camera.is_live("1"));

        let stop_logs: Vec<_> = fx
            .scheduler
            .logs_for_room(1)
            .expect("logs")
            .into_iter()
            .filter(|l| l.action == ScheduleAction::StopCamera && l.success)
            .collect();
        assert_eq!(stop_logs.len(), 1);

        // The second class saw a live camera and logged a skip rather than
        // a second start.
        assert!(fx
            .scheduler
            .logs_for_schedule(class_b.id)
            .expect("logs")
            .iter()
            .any(|l| l.action == ScheduleAction::SkipAlreadyRunning));
    }

    #[tokio::test]
    async fn test_duplicate_suppression_within_window() {
        let fx = fixture();
        seed_room_with_camera(&fx, 1);

        let nine = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let ten = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let schedule = fx
            .scheduler
            .create_schedule(one_time(0, 1, nine, ten))
            .expect("create");

        let t = Utc.with_ymd_and_hms(2026, 3, 4, 9, 30, 0).unwrap();
        fx.scheduler.run_tick_at(t).await.expect("tick");
        // Camera dropped outside the scheduler's sight; a tick 30 seconds
        // later is still inside the duplicate window and does nothing.
        fx.camera.stop_camera("1").await.expect("stop");
        fx.scheduler
            .run_tick_at(t + Duration::seconds(30))
            .await
            .expect("tick");
        assert!(!fx.camera.is_live("1"));

        // Past the window it starts again.
        fx.scheduler
            .run_tick_at(t + Duration::seconds(90))
            .await
            .expect("tick");
        assert!(fx.camera.is_live("1"));

        let start_logs: Vec<_> = fx
            .scheduler
            .logs_for_schedule(schedule.id)
            .expect("logs")
            .into_iter()
            .filter(|l| l.action == ScheduleAction::StartCamera && l.success)
            .collect();
        assert_eq!(start_logs.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_camera_config_logs_failure() {
        let fx = fixture();
        fx.store
            .with_write(|tx| {
                let room = Room::new(1, 1, 101, "Room".to_string());
                tx.put(&ROOMS, 1u64, &room)?;
                Ok(())
            })
            .expect("seed");

        let nine = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let ten = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let schedule = fx
            .scheduler
            .create_schedule(one_time(0, 1, nine, ten))
            .expect("create");

        let t = Utc.with_ymd_and_hms(2026, 3, 4, 9, 30, 0).unwrap();
        fx.scheduler.run_tick_at(t).await.expect("tick");
        assert!(!fx.camera.is_live("1"));

        let logs = fx.scheduler.logs_for_schedule(schedule.id).expect("logs");
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].success);
        assert!(logs[0].error_msg.contains("camera"));
    }

    #[tokio::test]
    async fn test_inactive_schedules_are_invisible() {
        let fx = fixture();
        seed_room_with_camera(&fx, 1);
        let nine = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let ten = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let mut schedule = one_time(0, 1, nine, ten);
        schedule.is_active = false;
        fx.scheduler.create_schedule(schedule).expect("create");

        let t = Utc.with_ymd_and_hms(2026, 3, 4, 9, 30, 0).unwrap();
        fx.scheduler.run_tick_at(t).await.expect("tick");
        assert!(!fx.camera.is_live("1"));
    }

    #[test]
    fn test_validate_schedule_rules() {
        let nine = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        let ten = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();

        let mut backwards = one_time(0, 1, ten, nine);
        backwards.name = "x".to_string();
        assert!(validate_schedule(&backwards).is_err());

        let mut bad_weekday = recurring(vec![7], "America/New_York");
        bad_weekday.recur_weekdays = vec![7];
        assert!(validate_schedule(&bad_weekday).is_err());

        let bad_tz = recurring(vec![3], "Nowhere/Nada");
        assert!(validate_schedule(&bad_tz).is_err());

        let mut bad_time = recurring(vec![3], "America/New_York");
        bad_time.recur_time_start = "9am".to_string();
        assert!(validate_schedule(&bad_time).is_err());

        assert!(validate_schedule(&recurring(vec![3], "America/New_York")).is_ok());
        assert!(validate_schedule(&one_time(0, 1, nine, ten)).is_ok());
    }
}
