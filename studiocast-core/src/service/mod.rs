pub mod access_code;
pub mod analytics;
pub mod hub;
pub mod rate_limit;
pub mod schedule;
pub mod stream_lifecycle;
pub mod studio;

pub use access_code::{AccessCodeService, AccessDecision, RevocationOutcome, ValidationOutcome};
pub use analytics::{anonymize_ip, AnalyticsService, PlaybackErrorKind, ReconcileReport};
pub use hub::{EventHub, HubEvent, SubscriberGuard};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use schedule::{compute_window, ScheduleWindow, SchedulerService};
pub use stream_lifecycle::{CameraControl, RecoveryReport, StreamLifecycleService, TranscoderControl};
pub use studio::StudioService;
