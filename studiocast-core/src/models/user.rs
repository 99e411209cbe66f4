use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller identity record. Credentials, password hashing and OAuth live in
/// the auth adapter; this is only what the control plane needs to attribute
/// actions and evaluate permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub is_site_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: u64, name: String, email: String) -> Self {
        Self {
            id,
            name,
            email,
            is_site_admin: false,
            created_at: Utc::now(),
        }
    }
}
