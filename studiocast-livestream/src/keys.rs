//! Input hardening for everything that ends up in an FFmpeg argv or a
//! filesystem path.
//!
//! Room ids become path components under the HLS root; stream keys become
//! URL path segments handed to the RTMP origin. Both are validated with a
//! whitelist, and URLs are passed as single argv elements so nothing here
//! ever meets a shell.

use crate::{Result, SupervisorError};

/// Characters a stream key may contain.
fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Reject room ids that are empty, dot-relative, or contain path
/// separators.
pub fn validate_room_id(room_id: &str) -> Result<()> {
    if room_id.is_empty() {
        return Err(SupervisorError::InvalidRoomId("empty".to_string()));
    }
    if room_id == "." || room_id == ".." {
        return Err(SupervisorError::InvalidRoomId(room_id.to_string()));
    }
    if room_id.contains('/') || room_id.contains('\\') {
        return Err(SupervisorError::InvalidRoomId(
            "contains path separator".to_string(),
        ));
    }
    if !room_id.chars().all(is_key_char) {
        return Err(SupervisorError::InvalidRoomId(
            "contains forbidden characters".to_string(),
        ));
    }
    Ok(())
}

/// Reject stream keys that are empty or contain anything outside
/// `[A-Za-z0-9_-]`. The whitelist subsumes every shell metacharacter,
/// whitespace and traversal sequence.
pub fn validate_stream_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SupervisorError::InvalidKey("empty".to_string()));
    }
    if !key.chars().all(is_key_char) {
        return Err(SupervisorError::InvalidKey(
            "contains forbidden characters".to_string(),
        ));
    }
    Ok(())
}

/// A source URL must parse, carry one of `allowed_schemes`, and contain no
/// whitespace or control characters.
pub fn validate_source_url(raw: &str, allowed_schemes: &[&str]) -> Result<()> {
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(SupervisorError::InvalidSource(
            "contains whitespace or control characters".to_string(),
        ));
    }
    let parsed = url::Url::parse(raw)
        .map_err(|e| SupervisorError::InvalidSource(format!("unparseable: {e}")))?;
    if !allowed_schemes.contains(&parsed.scheme()) {
        return Err(SupervisorError::InvalidSource(format!(
            "scheme {} not allowed",
            parsed.scheme()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_rules() {
        assert!(validate_room_id("42").is_ok());
        assert!(validate_room_id("room-7_a").is_ok());

        assert!(validate_room_id("").is_err());
        assert!(validate_room_id(".").is_err());
        assert!(validate_room_id("..").is_err());
        assert!(validate_room_id("a/b").is_err());
        assert!(validate_room_id("a\\b").is_err());
        assert!(validate_room_id("../etc").is_err());
        assert!(validate_room_id("room 1").is_err());
    }

    #[test]
    fn test_stream_key_rules() {
        assert!(validate_stream_key("abcDEF123_-").is_ok());

        assert!(validate_stream_key("").is_err());
        for bad in [
            "a;b", "a|b", "a&b", "a`b", "a$b", "a\"b", "a'b", "a\\b", "a b", "a\nb", "a\rb",
            "a\tb", "a..b/",
        ] {
            assert!(validate_stream_key(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_source_url_rules() {
        assert!(validate_source_url("rtsp://cam.local:554/stream1", &["rtsp", "rtsps"]).is_ok());
        assert!(validate_source_url("rtmp://origin/live/key", &["rtmp"]).is_ok());

        assert!(validate_source_url("file:///etc/passwd", &["rtsp"]).is_err());
        assert!(validate_source_url("rtsp://cam.local/a b", &["rtsp"]).is_err());
        assert!(validate_source_url("not a url", &["rtsp"]).is_err());
    }
}
