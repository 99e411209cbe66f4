//! Access-code lifecycle engine.
//!
//! Codes are 5-digit human-typeable tokens granting time-boxed anonymous
//! viewing. Validation produces an opaque 256-bit session; sessions of an
//! expired code get one 15-minute grace window each before they are
//! deleted; revocation kills every session immediately and notifies the
//! affected rooms through the event hub.
//!
//! Admin authorization for generation and revocation is the caller's
//! responsibility (the HTTP layer checks studio roles before calling in).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::models::{AccessCode, CodeAnalytics, CodeSession, CodeType, Room};
use crate::service::hub::EventHub;
use crate::service::rate_limit::{RateLimitDecision, RateLimiter};
use crate::service::studio::delete_code_record;
use crate::store::buckets::*;
use crate::store::Store;
use crate::{Error, Result};

/// Extra viewing window granted per session when its code expires.
pub const GRACE_PERIOD_MINUTES: i64 = 15;
/// Sessions idle longer than this are reaped by the GC pass.
pub const SESSION_STALE_MINUTES: i64 = 10;
/// Codes expired longer than this are swept entirely.
pub const CODE_RETENTION_DAYS: i64 = 7;
/// Retry cap for non-colliding, non-trivial code generation.
const GENERATION_ATTEMPTS: u32 = 20;

const SESSION_GC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);
const EXPIRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

/// Result of a successful code validation.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub session_token: String,
    pub redirect_to: String,
    pub code_type: CodeType,
    pub target_id: u64,
    pub expires_at: DateTime<Utc>,
}

/// Result of an access check for a room.
#[derive(Debug, Clone, Copy)]
pub struct AccessDecision {
    pub allowed: bool,
    pub grace_period: bool,
}

/// Result of a revocation.
#[derive(Debug, Clone)]
pub struct RevocationOutcome {
    pub sessions_killed: usize,
}

pub struct AccessCodeService {
    store: Arc<Store>,
    hub: Arc<EventHub>,
    limiter: Arc<RateLimiter>,
}

impl AccessCodeService {
    pub fn new(store: Arc<Store>, hub: Arc<EventHub>, limiter: Arc<RateLimiter>) -> Self {
        Self { store, hub, limiter }
    }

    // ---- generation --------------------------------------------------

    /// Create a new access code for a room or a whole studio.
    pub fn generate_code(
        &self,
        created_by_user_id: u64,
        code_type: CodeType,
        target_id: u64,
        duration_minutes: i64,
        max_viewers: u32,
        label: String,
    ) -> Result<AccessCode> {
        if let RateLimitDecision::Limited {
            retry_after_seconds,
            violation_count,
            message,
        } = self.limiter.check_code_generation(created_by_user_id)
        {
            return Err(Error::RateLimited {
                retry_after_seconds,
                violation_count,
                message,
            });
        }
        if duration_minutes <= 0 {
            return Err(Error::invalid("duration must be positive"));
        }
        if label.len() > crate::models::access_code::MAX_LABEL_LEN {
            return Err(Error::invalid("label too long"));
        }

        let now = Utc::now();
        self.store.with_write(|tx| {
            match code_type {
                CodeType::Room => {
                    if tx.get::<_, Room>(&ROOMS, target_id)?.is_none() {
                        return Err(Error::not_found("room"));
                    }
                }
                CodeType::Studio => {
                    if tx
                        .get::<_, crate::models::Studio>(&STUDIOS, target_id)?
                        .is_none()
                    {
                        return Err(Error::not_found("studio"));
                    }
                }
            }

            let mut rng = rand::thread_rng();
            for _ in 0..GENERATION_ATTEMPTS {
                let candidate = format!("{:05}", rng.gen_range(10000..=99999));
                if is_trivial_code(&candidate) {
                    continue;
                }
                if tx
                    .get::<_, AccessCode>(&ACCESS_CODES, candidate.as_str())?
                    .is_some()
                {
                    continue;
                }

                let code = AccessCode {
                    code: candidate.clone(),
                    code_type,
                    target_id,
                    created_by_user_id,
                    created_at: now,
                    expires_at: now + Duration::minutes(duration_minutes),
                    max_viewers,
                    is_revoked: false,
                    label: label.clone(),
                };
                tx.put(&ACCESS_CODES, candidate.as_str(), &code)?;
                tx.put(
                    &CODE_ANALYTICS,
                    candidate.as_str(),
                    &CodeAnalytics::new(candidate.clone()),
                )?;
                tx.link(&CODES_BY_CREATOR, created_by_user_id, candidate.as_str())?;
                match code_type {
                    CodeType::Room => tx.link(&CODES_BY_ROOM, target_id, candidate.as_str())?,
                    CodeType::Studio => tx.link(&CODES_BY_STUDIO, target_id, candidate.as_str())?,
                }
                return Ok(code);
            }
            Err(Error::internal("could not generate a unique access code"))
        })
    }

    // ---- validation --------------------------------------------------

    /// Validate a typed-in code and open a viewer session for it.
    pub fn validate_code(
        &self,
        code: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<ValidationOutcome> {
        if let RateLimitDecision::Limited {
            retry_after_seconds,
            violation_count,
            message,
        } = self.limiter.check_code_validation(client_ip)
        {
            return Err(Error::RateLimited {
                retry_after_seconds,
                violation_count,
                message,
            });
        }
        if code.len() != 5 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid("code must be 5 digits"));
        }

        let now = Utc::now();
        let outcome = self.store.with_write(|tx| {
            let record: AccessCode = tx
                .get(&ACCESS_CODES, code)?
                .ok_or_else(|| Error::not_found("access code"))?;
            if record.is_revoked {
                return Err(Error::Revoked);
            }
            if record.is_expired(now) {
                return Err(Error::Expired);
            }

            let mut analytics: CodeAnalytics = tx
                .get(&CODE_ANALYTICS, code)?
                .unwrap_or_else(|| CodeAnalytics::new(code.to_string()));
            if record.max_viewers > 0 && analytics.current_viewers >= record.max_viewers {
                return Err(Error::Capacity(format!(
                    "code is at its viewer limit ({})",
                    record.max_viewers
                )));
            }

            let session =
                CodeSession::new(code.to_string(), client_ip.to_string(), user_agent.to_string());
            tx.put(&CODE_SESSIONS, session.token.as_str(), &session)?;
            tx.link(&SESSIONS_BY_CODE, code, session.token.as_str())?;

            analytics.record_connection(now);
            tx.put(&CODE_ANALYTICS, code, &analytics)?;

            let redirect_to = match record.code_type {
                CodeType::Room => format!("/stream/{}", record.target_id),
                CodeType::Studio => format!("/studio/{}", record.target_id),
            };
            Ok(ValidationOutcome {
                session_token: session.token,
                redirect_to,
                code_type: record.code_type,
                target_id: record.target_id,
                expires_at: record.expires_at,
            })
        })?;

        // A valid entry clears this client's escalation state.
        self.limiter.reset_violations("code_validation", client_ip);
        Ok(outcome)
    }

    // ---- access checks -----------------------------------------------

    /// May the holder of `session_token` watch `room_id` right now?
    ///
    /// The first check after the owning code expires grants the session a
    /// one-off grace window; once that window passes the session is denied
    /// (and deleted by the next expirer pass).
    pub fn check_room_access(&self, session_token: &str, room_id: u64) -> Result<AccessDecision> {
        self.check_room_access_at(Utc::now(), session_token, room_id)
    }

    fn check_room_access_at(
        &self,
        now: DateTime<Utc>,
        session_token: &str,
        room_id: u64,
    ) -> Result<AccessDecision> {
        self.store.with_write(|tx| {
            let mut session: CodeSession = tx
                .get(&CODE_SESSIONS, session_token)?
                .ok_or_else(|| Error::not_found("session"))?;
            let code: AccessCode = tx
                .get(&ACCESS_CODES, session.code.as_str())?
                .ok_or_else(|| Error::not_found("access code"))?;
            if code.is_revoked {
                return Err(Error::Revoked);
            }

            match code.code_type {
                CodeType::Room => {
                    if code.target_id != room_id {
                        return Err(Error::Forbidden("code is for a different room".to_string()));
                    }
                }
                CodeType::Studio => {
                    let room: Room = tx
                        .get(&ROOMS, room_id)?
                        .ok_or_else(|| Error::not_found("room"))?;
                    if room.studio_id != code.target_id {
                        return Err(Error::Forbidden(
                            "code is for a different studio".to_string(),
                        ));
                    }
                }
            }

            let mut grace_period = false;
            if code.is_expired(now) {
                match session.grace_period_until {
                    None => {
                        session.grace_period_until =
                            Some(now + Duration::minutes(GRACE_PERIOD_MINUTES));
                        grace_period = true;
                    }
                    Some(until) if now < until => grace_period = true,
                    Some(_) => return Err(Error::Expired),
                }
            }

            session.last_seen = now;
            tx.put(&CODE_SESSIONS, session_token, &session)?;
            Ok(AccessDecision {
                allowed: true,
                grace_period,
            })
        })
    }

    /// Refresh a live session's `last_seen` (SSE heartbeat).
    pub fn touch_session(&self, session_token: &str) -> Result<()> {
        self.store.with_write(|tx| {
            if let Some(mut session) = tx.get::<_, CodeSession>(&CODE_SESSIONS, session_token)? {
                session.last_seen = Utc::now();
                tx.put(&CODE_SESSIONS, session_token, &session)?;
            }
            Ok(())
        })
    }

    pub fn get_session(&self, session_token: &str) -> Result<Option<CodeSession>> {
        self.store
            .with_read(|tx| tx.get(&CODE_SESSIONS, session_token))
    }

    pub fn get_code(&self, code: &str) -> Result<Option<AccessCode>> {
        self.store.with_read(|tx| tx.get(&ACCESS_CODES, code))
    }

    pub fn code_analytics(&self, code: &str) -> Result<Option<CodeAnalytics>> {
        self.store.with_read(|tx| tx.get(&CODE_ANALYTICS, code))
    }

    /// Codes targeting one room, for admin listings.
    pub fn codes_for_room(&self, room_id: u64) -> Result<Vec<AccessCode>> {
        self.store.with_read(|tx| {
            let mut codes = Vec::new();
            for code in tx.str_targets(&CODES_BY_ROOM, room_id)? {
                if let Some(record) = tx.get(&ACCESS_CODES, code.as_str())? {
                    codes.push(record);
                }
            }
            Ok(codes)
        })
    }

    pub fn codes_for_studio(&self, studio_id: u64) -> Result<Vec<AccessCode>> {
        self.store.with_read(|tx| {
            let mut codes = Vec::new();
            for code in tx.str_targets(&CODES_BY_STUDIO, studio_id)? {
                if let Some(record) = tx.get(&ACCESS_CODES, code.as_str())? {
                    codes.push(record);
                }
            }
            Ok(codes)
        })
    }

    // ---- revocation --------------------------------------------------

    /// Revoke a code and delete all of its sessions. Subscribers holding
    /// one of the killed tokens receive `code_revoked` on every affected
    /// room.
    pub fn revoke_code(&self, code: &str) -> Result<RevocationOutcome> {
        let (tokens, rooms) = self.store.with_write(|tx| {
            let mut record: AccessCode = tx
                .get(&ACCESS_CODES, code)?
                .ok_or_else(|| Error::not_found("access code"))?;
            if record.is_revoked {
                return Err(Error::conflict("code is already revoked"));
            }
            record.is_revoked = true;
            tx.put(&ACCESS_CODES, code, &record)?;

            let tokens = tx.str_targets(&SESSIONS_BY_CODE, code)?;
            for token in &tokens {
                tx.delete(&CODE_SESSIONS, token.as_str())?;
            }
            tx.unlink_all(&SESSIONS_BY_CODE, code)?;

            if let Some(mut analytics) = tx.get::<_, CodeAnalytics>(&CODE_ANALYTICS, code)? {
                analytics.drop_viewers(tokens.len() as u32);
                tx.put(&CODE_ANALYTICS, code, &analytics)?;
            }

            let rooms = match record.code_type {
                CodeType::Room => vec![record.target_id],
                CodeType::Studio => tx.targets(&ROOMS_BY_STUDIO, record.target_id)?,
            };
            Ok((tokens, rooms))
        })?;

        for room_id in &rooms {
            self.hub.broadcast_code_revoked(*room_id, &tokens);
        }
        tracing::info!(
            code,
            sessions_killed = tokens.len(),
            rooms = rooms.len(),
            "access code revoked"
        );
        Ok(RevocationOutcome {
            sessions_killed: tokens.len(),
        })
    }

    // ---- background jobs ---------------------------------------------

    /// Delete sessions idle past the staleness cutoff.
    pub fn run_session_gc(&self) -> Result<usize> {
        self.session_gc_at(Utc::now())
    }

    fn session_gc_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::minutes(SESSION_STALE_MINUTES);
        self.store.with_write(|tx| {
            let mut stale: Vec<CodeSession> = Vec::new();
            tx.for_each(&CODE_SESSIONS, |_, session: CodeSession| {
                if session.last_seen < cutoff {
                    stale.push(session);
                }
                true
            })?;
            for session in &stale {
                tx.delete(&CODE_SESSIONS, session.token.as_str())?;
                tx.unlink(&SESSIONS_BY_CODE, session.code.as_str(), session.token.as_str())?;
                if let Some(mut analytics) =
                    tx.get::<_, CodeAnalytics>(&CODE_ANALYTICS, session.code.as_str())?
                {
                    analytics.drop_viewers(1);
                    tx.put(&CODE_ANALYTICS, session.code.as_str(), &analytics)?;
                }
            }
            Ok(stale.len())
        })
    }

    /// Walk expired codes: grant grace to sessions that lack it, delete
    /// sessions whose grace has run out.
    pub fn run_expiry_pass(&self) -> Result<()> {
        self.expiry_pass_at(Utc::now())
    }

    fn expiry_pass_at(&self, now: DateTime<Utc>) -> Result<()> {
        let granted_rooms = self.store.with_write(|tx| {
            let mut expired: Vec<AccessCode> = Vec::new();
            tx.for_each(&ACCESS_CODES, |_, code: AccessCode| {
                if !code.is_revoked && now >= code.expires_at {
                    expired.push(code);
                }
                true
            })?;

            let mut granted_rooms: Vec<u64> = Vec::new();
            for code in &expired {
                let mut granted_any = false;
                for token in tx.str_targets(&SESSIONS_BY_CODE, code.code.as_str())? {
                    let Some(mut session) =
                        tx.get::<_, CodeSession>(&CODE_SESSIONS, token.as_str())?
                    else {
                        continue;
                    };
                    match session.grace_period_until {
                        None => {
                            session.grace_period_until =
                                Some(now + Duration::minutes(GRACE_PERIOD_MINUTES));
                            tx.put(&CODE_SESSIONS, token.as_str(), &session)?;
                            granted_any = true;
                        }
                        Some(until) if now >= until => {
                            tx.delete(&CODE_SESSIONS, token.as_str())?;
                            tx.unlink(&SESSIONS_BY_CODE, code.code.as_str(), token.as_str())?;
                            if let Some(mut analytics) =
                                tx.get::<_, CodeAnalytics>(&CODE_ANALYTICS, code.code.as_str())?
                            {
                                analytics.drop_viewers(1);
                                tx.put(&CODE_ANALYTICS, code.code.as_str(), &analytics)?;
                            }
                        }
                        Some(_) => {}
                    }
                }
                if granted_any {
                    match code.code_type {
                        CodeType::Room => granted_rooms.push(code.target_id),
                        CodeType::Studio => {
                            granted_rooms.extend(tx.targets(&ROOMS_BY_STUDIO, code.target_id)?);
                        }
                    }
                }
            }
            Ok(granted_rooms)
        })?;

        for room_id in granted_rooms {
            self.hub
                .broadcast_code_expired_grace_period(room_id, GRACE_PERIOD_MINUTES);
        }
        Ok(())
    }

    /// Remove codes expired for longer than the retention window, along
    /// with their analytics, sessions and index entries.
    pub fn run_code_sweep(&self) -> Result<usize> {
        self.code_sweep_at(Utc::now())
    }

    fn code_sweep_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(CODE_RETENTION_DAYS);
        self.store.with_write(|tx| {
            let mut old: Vec<String> = Vec::new();
            tx.for_each(&ACCESS_CODES, |_, code: AccessCode| {
                if code.expires_at < cutoff {
                    old.push(code.code.clone());
                }
                true
            })?;
            for code in &old {
                delete_code_record(tx, code)?;
            }
            Ok(old.len())
        })
    }

    /// Spawn the three periodic jobs. Each catches and logs its own
    /// failures without terminating the loop.
    pub fn start_background_jobs(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let svc = Arc::clone(self);
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_GC_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => match svc.run_session_gc() {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(reaped = n, "inactive session GC"),
                        Err(e) => tracing::error!("session GC failed: {e}"),
                    },
                }
            }
        }));

        let svc = Arc::clone(self);
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(EXPIRY_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = svc.run_expiry_pass() {
                            tracing::error!("expired-code pass failed: {e}");
                        }
                    }
                }
            }
        }));

        let svc = Arc::clone(self);
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => match svc.run_code_sweep() {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(swept = n, "old-code sweep"),
                        Err(e) => tracing::error!("old-code sweep failed: {e}"),
                    },
                }
            }
        }));

        handles
    }
}

/// Trivial patterns a generated code must never match: all digits equal,
/// strictly ascending by one, strictly descending by one.
#[must_use]
pub fn is_trivial_code(code: &str) -> bool {
    let digits = code.as_bytes();
    if digits.len() != 5 {
        return false;
    }
    let all_equal = digits.windows(2).all(|w| w[0] == w[1]);
    let ascending = digits.windows(2).all(|w| w[1] == w[0] + 1);
    let descending = digits.windows(2).all(|w| w[0] == w[1] + 1);
    all_equal || ascending || descending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::studio::StudioService;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<Store>,
        hub: Arc<EventHub>,
        codes: Arc<AccessCodeService>,
        studios: StudioService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(dir.path().join("test.redb")).expect("open"));
        let hub = Arc::new(EventHub::new());
        let limiter = Arc::new(RateLimiter::new());
        let codes = Arc::new(AccessCodeService::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            limiter,
        ));
        let studios = StudioService::new(Arc::clone(&store));
        Fixture {
            _dir: dir,
            store,
            hub,
            codes,
            studios,
        }
    }

    fn seed_room(fx: &Fixture) -> (u64, Room) {
        let user = fx
            .studios
            .create_user("Pat".to_string(), "pat@example.com".to_string())
            .expect("user");
        let studio = fx
            .studios
            .create_studio(user.id, "Main".to_string(), String::new(), None)
            .expect("studio");
        let room = fx
            .studios
            .create_room(studio.id, 101, "Room A".to_string())
            .expect("room");
        (user.id, room)
    }

    #[test]
    fn test_trivial_patterns() {
        for code in ["11111", "77777", "12345", "23456", "01234", "98765", "54321", "43210"] {
            assert!(is_trivial_code(code), "{code} should be trivial");
        }
        for code in ["12309", "13579", "90210", "11112", "54320"] {
            assert!(!is_trivial_code(code), "{code} should be fine");
        }
    }

    #[test]
    fn test_generate_code_shape() {
        let fx = fixture();
        let (user_id, room) = seed_room(&fx);
        let code = fx
            .codes
            .generate_code(user_id, CodeType::Room, room.id, 120, 0, "evening class".to_string())
            .expect("generate");
        assert_eq!(code.code.len(), 5);
        assert!(code.code.bytes().all(|b| b.is_ascii_digit()));
        assert!(!is_trivial_code(&code.code));
        // Exactly one analytics record exists for it.
        let analytics = fx.codes.code_analytics(&code.code).expect("read").expect("present");
        assert_eq!(analytics.total_connections, 0);
    }

    #[test]
    fn test_generate_rejects_missing_target() {
        let fx = fixture();
        let (user_id, _room) = seed_room(&fx);
        assert!(matches!(
            fx.codes.generate_code(user_id, CodeType::Room, 999, 60, 0, String::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_validate_increments_analytics() {
        let fx = fixture();
        let (user_id, room) = seed_room(&fx);
        let code = fx
            .codes
            .generate_code(user_id, CodeType::Room, room.id, 120, 0, String::new())
            .expect("generate");

        let first = fx
            .codes
            .validate_code(&code.code, "203.0.113.7", "test-agent")
            .expect("validate");
        assert_eq!(first.redirect_to, format!("/stream/{}", room.id));
        assert_eq!(first.target_id, room.id);

        let second = fx
            .codes
            .validate_code(&code.code, "203.0.113.8", "test-agent")
            .expect("validate");
        assert_ne!(first.session_token, second.session_token);

        let analytics = fx.codes.code_analytics(&code.code).expect("read").expect("present");
        assert_eq!(analytics.total_connections, 2);
        assert_eq!(analytics.current_viewers, 2);
        assert_eq!(analytics.peak_viewers, 2);
    }

    #[test]
    fn test_validate_unknown_code() {
        let fx = fixture();
        seed_room(&fx);
        assert!(matches!(
            fx.codes.validate_code("40404", "203.0.113.7", ""),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            fx.codes.validate_code("4o4o4", "203.0.113.7", ""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_viewer_capacity() {
        let fx = fixture();
        let (user_id, room) = seed_room(&fx);
        let code = fx
            .codes
            .generate_code(user_id, CodeType::Room, room.id, 120, 1, String::new())
            .expect("generate");
        fx.codes
            .validate_code(&code.code, "203.0.113.7", "")
            .expect("first viewer");
        assert!(matches!(
            fx.codes.validate_code(&code.code, "203.0.113.8", ""),
            Err(Error::Capacity(_))
        ));
    }

    #[test]
    fn test_validation_rate_limit_by_ip() {
        let fx = fixture();
        seed_room(&fx);
        for _ in 0..5 {
            let _ = fx.codes.validate_code("40404", "198.51.100.9", "");
        }
        let denied = fx.codes.validate_code("40404", "198.51.100.9", "");
        assert!(matches!(denied, Err(Error::RateLimited { .. })));
        // A different IP is unaffected.
        assert!(matches!(
            fx.codes.validate_code("40404", "198.51.100.10", ""),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_room_access_and_grace_lifecycle() {
        let fx = fixture();
        let (user_id, room) = seed_room(&fx);
        let code = fx
            .codes
            .generate_code(user_id, CodeType::Room, room.id, 1, 0, String::new())
            .expect("generate");
        let outcome = fx
            .codes
            .validate_code(&code.code, "203.0.113.7", "")
            .expect("validate");
        let token = outcome.session_token;

        // Within validity: allowed, no grace.
        let decision = fx.codes.check_room_access(&token, room.id).expect("allowed");
        assert!(decision.allowed && !decision.grace_period);

        // Wrong room: forbidden.
        assert!(matches!(
            fx.codes.check_room_access(&token, room.id + 1),
            Err(Error::NotFound(_) | Error::Forbidden(_))
        ));

        // Just past expiry: grace is granted once...
        let after_expiry = code.expires_at + Duration::seconds(1);
        let decision = fx
            .codes
            .check_room_access_at(after_expiry, &token, room.id)
            .expect("grace");
        assert!(decision.allowed && decision.grace_period);

        // ...and stays valid inside the window...
        let mid_grace = after_expiry + Duration::minutes(5);
        let decision = fx
            .codes
            .check_room_access_at(mid_grace, &token, room.id)
            .expect("grace");
        assert!(decision.allowed && decision.grace_period);

        // ...and is denied after it passes.
        let past_grace = after_expiry + Duration::minutes(GRACE_PERIOD_MINUTES + 1);
        assert!(matches!(
            fx.codes.check_room_access_at(past_grace, &token, room.id),
            Err(Error::Expired)
        ));
    }

    #[test]
    fn test_expiry_pass_grants_then_deletes() {
        let fx = fixture();
        let (user_id, room) = seed_room(&fx);
        let code = fx
            .codes
            .generate_code(user_id, CodeType::Room, room.id, 1, 0, String::new())
            .expect("generate");
        let outcome = fx
            .codes
            .validate_code(&code.code, "203.0.113.7", "")
            .expect("validate");
        let token = outcome.session_token;

        let (_guard, mut rx) = fx.hub.subscribe(room.id, Some(token.clone()), None);

        // First pass after expiry: session gains a grace window, event fires.
        let t1 = code.expires_at + Duration::seconds(1);
        fx.codes.expiry_pass_at(t1).expect("pass");
        let session = fx.codes.get_session(&token).expect("read").expect("present");
        let until = session.grace_period_until.expect("grace set");
        assert_eq!(until, t1 + Duration::minutes(GRACE_PERIOD_MINUTES));
        assert!(matches!(
            rx.try_recv(),
            Ok(crate::service::hub::HubEvent::CodeExpiredGracePeriod { .. })
        ));

        // Second pass while grace holds: session survives, grace unchanged.
        fx.codes
            .expiry_pass_at(t1 + Duration::minutes(5))
            .expect("pass");
        let session = fx.codes.get_session(&token).expect("read").expect("present");
        assert_eq!(session.grace_period_until, Some(until));

        // Pass after grace end: session deleted, viewer count decremented.
        fx.codes
            .expiry_pass_at(until + Duration::minutes(1))
            .expect("pass");
        assert!(fx.codes.get_session(&token).expect("read").is_none());
        let analytics = fx.codes.code_analytics(&code.code).expect("read").expect("present");
        assert_eq!(analytics.current_viewers, 0);
    }

    #[test]
    fn test_revocation_kills_sessions_and_notifies() {
        let fx = fixture();
        let (user_id, room) = seed_room(&fx);
        let code = fx
            .codes
            .generate_code(user_id, CodeType::Room, room.id, 120, 0, String::new())
            .expect("generate");
        let s1 = fx
            .codes
            .validate_code(&code.code, "203.0.113.7", "")
            .expect("validate")
            .session_token;
        let s2 = fx
            .codes
            .validate_code(&code.code, "203.0.113.8", "")
            .expect("validate")
            .session_token;

        let (_guard, mut rx) = fx.hub.subscribe(room.id, Some(s1.clone()), None);

        let outcome = fx.codes.revoke_code(&code.code).expect("revoke");
        assert_eq!(outcome.sessions_killed, 2);
        assert!(fx.codes.get_session(&s1).expect("read").is_none());
        assert!(fx.codes.get_session(&s2).expect("read").is_none());
        assert!(matches!(
            rx.try_recv(),
            Ok(crate::service::hub::HubEvent::CodeRevoked { .. })
        ));

        // Revoking again conflicts; validating against it reports revoked.
        assert!(matches!(fx.codes.revoke_code(&code.code), Err(Error::Conflict(_))));
        assert!(matches!(
            fx.codes.validate_code(&code.code, "203.0.113.9", ""),
            Err(Error::Revoked)
        ));
    }

    #[test]
    fn test_session_gc_reaps_stale_sessions() {
        let fx = fixture();
        let (user_id, room) = seed_room(&fx);
        let code = fx
            .codes
            .generate_code(user_id, CodeType::Room, room.id, 120, 0, String::new())
            .expect("generate");
        let token = fx
            .codes
            .validate_code(&code.code, "203.0.113.7", "")
            .expect("validate")
            .session_token;

        // Not yet stale.
        let reaped = fx
            .codes
            .session_gc_at(Utc::now() + Duration::minutes(SESSION_STALE_MINUTES - 1))
            .expect("gc");
        assert_eq!(reaped, 0);

        let reaped = fx
            .codes
            .session_gc_at(Utc::now() + Duration::minutes(SESSION_STALE_MINUTES + 1))
            .expect("gc");
        assert_eq!(reaped, 1);
        assert!(fx.codes.get_session(&token).expect("read").is_none());
        let analytics = fx.codes.code_analytics(&code.code).expect("read").expect("present");
        assert_eq!(analytics.current_viewers, 0);
    }

    #[test]
    fn test_code_sweep_removes_week_old_codes() {
        let fx = fixture();
        let (user_id, room) = seed_room(&fx);
        let code = fx
            .codes
            .generate_code(user_id, CodeType::Room, room.id, 60, 0, String::new())
            .expect("generate");
        fx.codes
            .validate_code(&code.code, "203.0.113.7", "")
            .expect("validate");

        // Too early: still retained.
        let swept = fx
            .codes
            .code_sweep_at(code.expires_at + Duration::days(CODE_RETENTION_DAYS - 1))
            .expect("sweep");
        assert_eq!(swept, 0);

        let swept = fx
            .codes
            .code_sweep_at(code.expires_at + Duration::days(CODE_RETENTION_DAYS + 1))
            .expect("sweep");
        assert_eq!(swept, 1);
        assert!(fx.codes.get_code(&code.code).expect("read").is_none());
        assert!(fx.codes.code_analytics(&code.code).expect("read").is_none());
        let fx_store = &fx.store;
        let tokens = fx_store
            .with_read(|tx| tx.str_targets(&SESSIONS_BY_CODE, code.code.as_str()))
            .expect("targets");
        assert!(tokens.is_empty());
    }
}
