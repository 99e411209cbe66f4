use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A class timetable entry, either one-time or recurring.
///
/// Recurring schedules are evaluated in `recur_timezone`; weekdays use
/// 0 = Sunday through 6 = Saturday and times are "HH:MM" wall-clock
/// strings in that zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSchedule {
    pub id: u64,
    pub studio_id: u64,
    pub room_id: u64,
    pub name: String,
    pub is_recurring: bool,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recur_weekdays: Vec<u8>,
    #[serde(default)]
    pub recur_time_start: String,
    #[serde(default)]
    pub recur_time_end: String,
    #[serde(default)]
    pub recur_timezone: String,
    #[serde(default)]
    pub recur_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub recur_end_date: Option<NaiveDate>,
    pub pre_roll_minutes: i64,
    pub post_roll_minutes: i64,
    pub auto_start_camera: bool,
    pub auto_stop_camera: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleAction {
    StartCamera,
    StopCamera,
    SkipAlreadyRunning,
}

impl ScheduleAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartCamera => "start_camera",
            Self::StopCamera => "stop_camera",
            Self::SkipAlreadyRunning => "skip_already_running",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleExecutionLog {
    pub id: u64,
    pub schedule_id: u64,
    pub room_id: u64,
    pub action: ScheduleAction,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub error_msg: String,
}
