//! In-memory sliding window rate limiter with violation escalation.
//!
//! Each `(kind, identifier)` pair keeps the timestamps of its recent
//! attempts; expired ones are pruned on access. A rejected attempt records
//! a violation and starts a lockout whose length escalates with the
//! violation count. Further checks during a lockout stay limited with the
//! same violation count. `reset_violations` clears the escalation on
//! successful business-level use (e.g. a valid code entry).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Limiter policy: code validation, per client IP.
pub const CODE_VALIDATION_LIMIT: u32 = 5;
pub const CODE_VALIDATION_WINDOW: Duration = Duration::from_secs(60);

/// Limiter policy: code generation, per user id.
pub const CODE_GENERATION_LIMIT: u32 = 10;
pub const CODE_GENERATION_WINDOW: Duration = Duration::from_secs(60);

const GC_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited {
        retry_after_seconds: u64,
        violation_count: u32,
        message: String,
    },
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

struct WindowEntry {
    /// Attempt timestamps in ms, oldest first.
    timestamps: VecDeque<u64>,
    violations: u32,
    locked_until_ms: u64,
    window_ms: u64,
    last_touched_ms: u64,
}

pub struct RateLimiter {
    entries: Mutex<HashMap<(String, String), WindowEntry>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check one attempt against `limit` per `window`.
    pub fn check(
        &self,
        kind: &str,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        self.check_at(now_ms(), kind, identifier, limit, window)
    }

    /// Code validation policy keyed by client IP.
    pub fn check_code_validation(&self, client_ip: &str) -> RateLimitDecision {
        self.check(
            "code_validation",
            client_ip,
            CODE_VALIDATION_LIMIT,
            CODE_VALIDATION_WINDOW,
        )
    }

    /// Code generation policy keyed by user id.
    pub fn check_code_generation(&self, user_id: u64) -> RateLimitDecision {
        self.check(
            "code_generation",
            &user_id.to_string(),
            CODE_GENERATION_LIMIT,
            CODE_GENERATION_WINDOW,
        )
    }

    fn check_at(
        &self,
        now: u64,
        kind: &str,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let window_ms = window.as_millis() as u64;
        let mut entries = self.entries.lock();
        let entry = entries
            .entry((kind.to_string(), identifier.to_string()))
            .or_insert_with(|| WindowEntry {
                timestamps: VecDeque::new(),
                violations: 0,
                locked_until_ms: 0,
                window_ms,
                last_touched_ms: now,
            });
        entry.last_touched_ms = now;
        entry.window_ms = window_ms;

        // Existing lockout: stay limited, same violation count.
        if now < entry.locked_until_ms {
            return RateLimitDecision::Limited {
                retry_after_seconds: ((entry.locked_until_ms - now) / 1000).max(1),
                violation_count: entry.violations,
                message: limited_message(entry.violations),
            };
        }

        let window_start = now.saturating_sub(window_ms);
        while entry.timestamps.front().is_some_and(|&ts| ts < window_start) {
            entry.timestamps.pop_front();
        }

        if (entry.timestamps.len() as u32) < limit {
            entry.timestamps.push_back(now);
            return RateLimitDecision::Allowed;
        }

        entry.violations += 1;
        let lockout = escalation_lockout(entry.violations);
        entry.locked_until_ms = now + lockout.as_millis() as u64;
        RateLimitDecision::Limited {
            retry_after_seconds: lockout.as_secs(),
            violation_count: entry.violations,
            message: limited_message(entry.violations),
        }
    }

    /// Clear the escalation state after a successful business-level use.
    pub fn reset_violations(&self, kind: &str, identifier: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&(kind.to_string(), identifier.to_string())) {
            entry.violations = 0;
            entry.locked_until_ms = 0;
        }
    }

    /// Drop entries untouched for longer than twice their window.
    pub fn gc(&self) {
        self.gc_at(now_ms());
    }

    fn gc_at(&self, now: u64) {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| {
            now < e.locked_until_ms || now.saturating_sub(e.last_touched_ms) < 2 * e.window_ms
        });
    }

    /// Spawn the periodic GC task.
    pub fn start_gc(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(GC_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => limiter.gc(),
                }
            }
        })
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Violation count -> lockout length: 1 min, 5 min, 15 min, then 1 h capped.
fn escalation_lockout(violations: u32) -> Duration {
    match violations {
        0 | 1 => Duration::from_secs(60),
        2 => Duration::from_secs(300),
        3 => Duration::from_secs(900),
        _ => Duration::from_secs(3600),
    }
}

fn limited_message(violations: u32) -> String {
    if violations > 1 {
        format!("Too many attempts ({violations} violations). Please slow down.")
    } else {
        "Too many attempts. Please slow down.".to_string()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 60_000;

    fn drain(limiter: &RateLimiter, now: u64, n: u32) {
        for i in 0..n {
            let d = limiter.check_at(now + u64::from(i), "k", "id", n, Duration::from_secs(60));
            assert!(d.is_allowed());
        }
    }

    #[test]
    fn test_allows_within_limit() {
        let limiter = RateLimiter::new();
        drain(&limiter, 1_000_000, 5);
    }

    #[test]
    fn test_sliding_window_frees_slots() {
        let limiter = RateLimiter::new();
        let t0 = 1_000_000;
        drain(&limiter, t0, 3);
        assert!(!limiter
            .check_at(t0 + 10, "k", "id", 3, Duration::from_secs(60))
            .is_allowed());
        // After the lockout and the window both pass, attempts flow again.
        let later = t0 + 2 * MIN;
        assert!(limiter
            .check_at(later, "k", "id", 3, Duration::from_secs(60))
            .is_allowed());
    }

    #[test]
    fn test_escalation_sequence() {
        let limiter = RateLimiter::new();
        let mut now = 1_000_000;
        let expected_minutes = [1, 5, 15, 60, 60, 60];
        for expected in expected_minutes {
            drain(&limiter, now, 2);
            let decision = limiter.check_at(now + 10, "k", "id", 2, Duration::from_secs(60));
            match decision {
                RateLimitDecision::Limited {
                    retry_after_seconds,
                    ..
                } => assert_eq!(retry_after_seconds, expected * 60),
                RateLimitDecision::Allowed => panic!("expected limited"),
            }
            // Step past both the lockout and the window.
            now += (expected + 2) * MIN;
        }
    }

    #[test]
    fn test_lockout_keeps_violation_count() {
        let limiter = RateLimiter::new();
        let t0 = 1_000_000;
        drain(&limiter, t0, 1);
        let first = limiter.check_at(t0 + 1, "k", "id", 1, Duration::from_secs(60));
        let RateLimitDecision::Limited {
            violation_count, ..
        } = first
        else {
            panic!("expected limited");
        };
        assert_eq!(violation_count, 1);

        // Mid-lockout attempts do not escalate.
        let again = limiter.check_at(t0 + 30_000, "k", "id", 1, Duration::from_secs(60));
        let RateLimitDecision::Limited {
            violation_count, ..
        } = again
        else {
            panic!("expected limited");
        };
        assert_eq!(violation_count, 1);
    }

    #[test]
    fn test_reset_violations_clears_escalation() {
        let limiter = RateLimiter::new();
        let t0 = 1_000_000;
        drain(&limiter, t0, 1);
        assert!(!limiter
            .check_at(t0 + 1, "k", "id", 1, Duration::from_secs(60))
            .is_allowed());

        limiter.reset_violations("k", "id");
        let after = t0 + 2 * MIN;
        assert!(limiter
            .check_at(after, "k", "id", 1, Duration::from_secs(60))
            .is_allowed());
        // Next violation starts back at the 1 minute tier.
        let decision = limiter.check_at(after + 1, "k", "id", 1, Duration::from_secs(60));
        let RateLimitDecision::Limited {
            retry_after_seconds,
            violation_count,
            ..
        } = decision
        else {
            panic!("expected limited");
        };
        assert_eq!(violation_count, 1);
        assert_eq!(retry_after_seconds, 60);
    }

    #[test]
    fn test_gc_drops_stale_entries() {
        let limiter = RateLimiter::new();
        let t0 = 1_000_000;
        assert!(limiter
            .check_at(t0, "k", "a", 5, Duration::from_secs(60))
            .is_allowed());
        assert!(limiter
            .check_at(t0 + 3 * MIN, "k", "b", 5, Duration::from_secs(60))
            .is_allowed());
        assert_eq!(limiter.entry_count(), 2);

        limiter.gc_at(t0 + 4 * MIN);
        assert_eq!(limiter.entry_count(), 1);
    }

    #[test]
    fn test_distinct_identifiers_do_not_interfere() {
        let limiter = RateLimiter::new();
        let t0 = 1_000_000;
        drain(&limiter, t0, 2);
        assert!(!limiter
            .check_at(t0 + 1, "k", "id", 2, Duration::from_secs(60))
            .is_allowed());
        assert!(limiter
            .check_at(t0 + 1, "k", "other", 2, Duration::from_secs(60))
            .is_allowed());
        assert!(limiter
            .check_at(t0 + 1, "other_kind", "id", 2, Duration::from_secs(60))
            .is_allowed());
    }
}
