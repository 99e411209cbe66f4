//! Symmetric signed session cookies.
//!
//! The payload is JSON, base64url-encoded, with an HMAC-SHA256 tag over
//! the encoded payload. Viewer (code-session) and staff identities share
//! the codec; the external auth adapter signs staff cookies with the same
//! secret.

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const SESSION_COOKIE_NAME: &str = "studiocast_session";
/// Cookie lifetime in seconds (24 h).
pub const SESSION_COOKIE_MAX_AGE: u64 = 24 * 3600;

type HmacSha256 = Hmac<Sha256>;

/// Cookie payload. Exactly one of the viewer and staff identities is
/// populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    #[serde(default)]
    pub is_code_session: bool,
    #[serde(default)]
    pub session_token: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<u64>,
}

impl SessionCookie {
    #[must_use]
    pub fn for_code_session(session_token: String, code: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            is_code_session: true,
            session_token,
            code,
            expires_at: Some(expires_at),
            user_id: None,
        }
    }

    #[must_use]
    pub fn for_user(user_id: u64) -> Self {
        Self {
            is_code_session: false,
            session_token: String::new(),
            code: String::new(),
            expires_at: None,
            user_id: Some(user_id),
        }
    }
}

pub struct CookieCodec {
    key: Vec<u8>,
}

impl CookieCodec {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    /// Encode and sign: `base64url(json) . base64url(tag)`.
    pub fn encode(&self, cookie: &SessionCookie) -> Result<String, serde_json::Error> {
        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let payload = engine.encode(serde_json::to_vec(cookie)?);
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        let tag = engine.encode(mac.finalize().into_bytes());
        Ok(format!("{payload}.{tag}"))
    }

    /// Verify and decode. `None` for malformed, tampered or unsigned
    /// values.
    #[must_use]
    pub fn decode(&self, raw: &str) -> Option<SessionCookie> {
        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let (payload, tag) = raw.split_once('.')?;
        let tag_bytes = engine.decode(tag).ok()?;

        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(payload.as_bytes());
        let expected = mac.finalize().into_bytes();
        if expected.as_slice().ct_eq(tag_bytes.as_slice()).unwrap_u8() != 1 {
            return None;
        }

        let json = engine.decode(payload).ok()?;
        serde_json::from_slice(&json).ok()
    }

    /// Full `Set-Cookie` header value for a signed session cookie.
    pub fn set_cookie_header(&self, cookie: &SessionCookie) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{SESSION_COOKIE_NAME}={}; Max-Age={SESSION_COOKIE_MAX_AGE}; Path=/; HttpOnly; SameSite=Lax",
            self.encode(cookie)?
        ))
    }
}

/// Pull the session cookie value out of a `Cookie` request header.
#[must_use]
pub fn session_cookie_value(cookie_header: &str) -> Option<&str> {
    cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE_NAME).then_some(value)
    })
}
