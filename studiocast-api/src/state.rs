use std::sync::Arc;

use axum::http::HeaderMap;

use studiocast_core::service::{
    AccessCodeService, AnalyticsService, EventHub, RateLimiter, SchedulerService,
    StreamLifecycleService, StudioService, TranscoderControl,
};
use studiocast_core::{Config, Store};

use crate::cookie::CookieCodec;

/// Shared handles for every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub hub: Arc<EventHub>,
    pub limiter: Arc<RateLimiter>,
    pub studios: Arc<StudioService>,
    pub codes: Arc<AccessCodeService>,
    pub scheduler: Arc<SchedulerService>,
    pub lifecycle: Arc<StreamLifecycleService>,
    pub analytics: Arc<AnalyticsService>,
    pub transcoder: Arc<dyn TranscoderControl>,
    pub cookies: Arc<CookieCodec>,
}

/// Best-effort client IP: leftmost `X-Forwarded-For` entry, else the
/// socket peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: std::net::SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}
