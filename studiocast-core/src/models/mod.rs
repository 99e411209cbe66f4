pub mod access_code;
pub mod analytics;
pub mod membership;
pub mod room;
pub mod schedule;
pub mod studio;
pub mod user;

pub use access_code::{AccessCode, CodeAnalytics, CodeSession, CodeType};
pub use analytics::{RoomAnalytics, StudioAnalytics};
pub use membership::{Membership, Role};
pub use room::{CameraConfig, Room, Stream};
pub use schedule::{ClassSchedule, ScheduleAction, ScheduleExecutionLog};
pub use studio::Studio;
pub use user::User;
