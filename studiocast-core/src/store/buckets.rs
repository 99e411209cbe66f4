//! Bucket and index definitions.
//!
//! Entity buckets are keyed by their monotonically assigned `u64` id, except
//! access codes (keyed by the 5-digit code), sessions (keyed by the opaque
//! token), per-code analytics (code) and memberships (`(user_id, studio_id)`).

use redb::{TableDefinition, WriteTransaction};

use super::{Bucket, Index};
use crate::models::{
    AccessCode, CameraConfig, ClassSchedule, CodeAnalytics, CodeSession, Membership, Room,
    RoomAnalytics, ScheduleExecutionLog, Stream, Studio, StudioAnalytics, User,
};
use crate::Result;

/// Per-bucket id counters.
pub(super) const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Stream-key uniqueness lookup: key -> owning room id.
pub(super) const STREAM_KEYS: TableDefinition<&str, u64> = TableDefinition::new("stream_keys");

pub static USERS: Bucket<u64, User> = Bucket::new("users");
pub static STUDIOS: Bucket<u64, Studio> = Bucket::new("studios");
pub static ROOMS: Bucket<u64, Room> = Bucket::new("rooms");
pub static MEMBERSHIPS: Bucket<(u64, u64), Membership> = Bucket::new("memberships");
pub static CAMERA_CONFIGS: Bucket<u64, CameraConfig> = Bucket::new("camera_configs");
pub static STREAMS: Bucket<u64, Stream> = Bucket::new("streams");
pub static ACCESS_CODES: Bucket<&str, AccessCode> = Bucket::new("access_codes");
pub static CODE_SESSIONS: Bucket<&str, CodeSession> = Bucket::new("code_sessions");
pub static CODE_ANALYTICS: Bucket<&str, CodeAnalytics> = Bucket::new("code_analytics");
pub static SCHEDULES: Bucket<u64, ClassSchedule> = Bucket::new("class_schedules");
pub static SCHEDULE_LOGS: Bucket<u64, ScheduleExecutionLog> = Bucket::new("schedule_logs");
pub static ROOM_ANALYTICS: Bucket<u64, RoomAnalytics> = Bucket::new("room_analytics");
pub static STUDIO_ANALYTICS: Bucket<u64, StudioAnalytics> = Bucket::new("studio_analytics");

pub static ROOMS_BY_STUDIO: Index<u64, u64> = Index::new("rooms_by_studio");
pub static STREAMS_BY_STUDIO: Index<u64, u64> = Index::new("streams_by_studio");
pub static STREAMS_BY_ROOM: Index<u64, u64> = Index::new("streams_by_room");
pub static CODES_BY_ROOM: Index<u64, &str> = Index::new("codes_by_room");
pub static CODES_BY_STUDIO: Index<u64, &str> = Index::new("codes_by_studio");
pub static CODES_BY_CREATOR: Index<u64, &str> = Index::new("codes_by_creator");
pub static SESSIONS_BY_CODE: Index<&str, &str> = Index::new("sessions_by_code");
pub static SCHEDULES_BY_ROOM: Index<u64, u64> = Index::new("schedules_by_room");
pub static LOGS_BY_SCHEDULE: Index<u64, u64> = Index::new("logs_by_schedule");
pub static LOGS_BY_ROOM: Index<u64, u64> = Index::new("logs_by_room");
pub static MEMBERSHIPS_BY_USER: Index<u64, u64> = Index::new("memberships_by_user");
pub static MEMBERSHIPS_BY_STUDIO: Index<u64, u64> = Index::new("memberships_by_studio");

/// Open every table once so later readers never hit a missing table.
pub(super) fn create_all(txn: &WriteTransaction) -> Result<()> {
    txn.open_table(SEQUENCES)?;
    txn.open_table(STREAM_KEYS)?;

    txn.open_table(USERS.def)?;
    txn.open_table(STUDIOS.def)?;
    txn.open_table(ROOMS.def)?;
    txn.open_table(MEMBERSHIPS.def)?;
    txn.open_table(CAMERA_CONFIGS.def)?;
    txn.open_table(STREAMS.def)?;
    txn.open_table(ACCESS_CODES.def)?;
    txn.open_table(CODE_SESSIONS.def)?;
    txn.open_table(CODE_ANALYTICS.def)?;
    txn.open_table(SCHEDULES.def)?;
    txn.open_table(SCHEDULE_LOGS.def)?;
    txn.open_table(ROOM_ANALYTICS.def)?;
    txn.open_table(STUDIO_ANALYTICS.def)?;

    txn.open_multimap_table(ROOMS_BY_STUDIO.def)?;
    txn.open_multimap_table(STREAMS_BY_STUDIO.def)?;
    txn.open_multimap_table(STREAMS_BY_ROOM.def)?;
    txn.open_multimap_table(CODES_BY_ROOM.def)?;
    txn.open_multimap_table(CODES_BY_STUDIO.def)?;
    txn.open_multimap_table(CODES_BY_CREATOR.def)?;
    txn.open_multimap_table(SESSIONS_BY_CODE.def)?;
    txn.open_multimap_table(SCHEDULES_BY_ROOM.def)?;
    txn.open_multimap_table(LOGS_BY_SCHEDULE.def)?;
    txn.open_multimap_table(LOGS_BY_ROOM.def)?;
    txn.open_multimap_table(MEMBERSHIPS_BY_USER.def)?;
    txn.open_multimap_table(MEMBERSHIPS_BY_STUDIO.def)?;
    Ok(())
}
