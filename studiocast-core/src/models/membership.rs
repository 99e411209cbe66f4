use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-studio role. Permission checks are "role >= required"; site admins
/// bypass per-studio checks entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Viewer,
    Member,
    Admin,
    Owner,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: u64,
    pub studio_id: u64,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(user_id: u64, studio_id: u64, role: Role) -> Self {
        Self {
            user_id,
            studio_id,
            role,
            joined_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Owner > Role::Admin);
        assert!(Role::Admin > Role::Member);
        assert!(Role::Member > Role::Viewer);
        assert!(Role::Admin >= Role::Admin);
    }
}
