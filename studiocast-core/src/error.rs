use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Rate limited. Try again in {retry_after_seconds}s")]
    RateLimited {
        retry_after_seconds: u64,
        violation_count: u32,
        message: String,
    },

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Access code expired")]
    Expired,

    #[error("Access code revoked")]
    Revoked,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code used in API error payloads.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage(_) | Self::Serialization(_) | Self::Internal(_) => "internal",
            Self::AuthRequired => "auth_required",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::RateLimited { .. } => "rate_limited",
            Self::Capacity(_) => "capacity",
            Self::SpawnFailed(_) => "spawn_failed",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::AuthRequired.code(), "auth_required");
        assert_eq!(Error::not_found("room").code(), "not_found");
        assert_eq!(Error::conflict("dup").code(), "conflict");
        assert_eq!(Error::invalid("bad").code(), "invalid_argument");
        assert_eq!(Error::Expired.code(), "expired");
        assert_eq!(Error::Revoked.code(), "revoked");
        assert_eq!(
            Error::RateLimited {
                retry_after_seconds: 60,
                violation_count: 1,
                message: String::new(),
            }
            .code(),
            "rate_limited"
        );
    }

    #[test]
    fn test_rate_limited_display_carries_retry_after() {
        let err = Error::RateLimited {
            retry_after_seconds: 42,
            violation_count: 2,
            message: "slow down".to_string(),
        };
        assert!(err.to_string().contains("42"));
    }
}
