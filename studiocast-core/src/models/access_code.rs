use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Maximum label length accepted on code creation.
pub const MAX_LABEL_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeType {
    Room,
    Studio,
}

impl CodeType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Room => "room",
            Self::Studio => "studio",
        }
    }
}

/// A 5-digit human-typeable token granting time-bounded anonymous viewing
/// of one room or all rooms in a studio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCode {
    pub code: String,
    pub code_type: CodeType,
    pub target_id: u64,
    pub created_by_user_id: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// 0 means unlimited.
    pub max_viewers: u32,
    pub is_revoked: bool,
    #[serde(default)]
    pub label: String,
}

impl AccessCode {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Server-side session created on successful code validation. The token is
/// the sole authority for anonymous viewer identity; never log more than a
/// truncated prefix of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSession {
    pub token: String,
    pub code: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Set once when the owning code expires; never cleared afterwards.
    #[serde(default)]
    pub grace_period_until: Option<DateTime<Utc>>,
    pub client_ip: String,
    #[serde(default)]
    pub user_agent: String,
}

impl CodeSession {
    pub fn new(code: String, client_ip: String, user_agent: String) -> Self {
        let now = Utc::now();
        Self {
            token: generate_session_token(),
            code,
            connected_at: now,
            last_seen: now,
            grace_period_until: None,
            client_ip,
            user_agent,
        }
    }

    /// Truncated token prefix safe for logs.
    #[must_use]
    pub fn token_prefix(&self) -> &str {
        &self.token[..self.token.len().min(8)]
    }
}

/// 256-bit random token, URL-safe base64 without padding.
#[must_use]
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Per-code viewer accounting. Exactly one record exists per access code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeAnalytics {
    pub code: String,
    pub total_connections: u64,
    pub current_viewers: u32,
    pub peak_viewers: u32,
    #[serde(default)]
    pub peak_viewers_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_connection_at: Option<DateTime<Utc>>,
}

impl CodeAnalytics {
    pub fn new(code: String) -> Self {
        Self {
            code,
            total_connections: 0,
            current_viewers: 0,
            peak_viewers: 0,
            peak_viewers_at: None,
            last_connection_at: None,
        }
    }

    /// Record one successful validation.
    pub fn record_connection(&mut self, now: DateTime<Utc>) {
        self.total_connections += 1;
        self.current_viewers += 1;
        self.last_connection_at = Some(now);
        if self.current_viewers > self.peak_viewers {
            self.peak_viewers = self.current_viewers;
            self.peak_viewers_at = Some(now);
        }
    }

    /// Decrement current viewers, clamped at zero.
    pub fn drop_viewers(&mut self, n: u32) {
        self.current_viewers = self.current_viewers.saturating_sub(n);
    }
}
