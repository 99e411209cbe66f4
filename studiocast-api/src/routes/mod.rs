pub mod analytics;
pub mod codes;
pub mod events;
pub mod hooks;
pub mod rooms;
pub mod schedules;
pub mod studios;
