use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard upper bound on rooms per studio.
pub const MAX_ROOMS_PER_STUDIO: u32 = 50;

/// Root tenant. Deleting a studio cascades across all child entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Studio {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub max_rooms: u32,
    pub owner_user_id: u64,
    pub created_at: DateTime<Utc>,
}

impl Studio {
    pub fn new(id: u64, name: String, description: String, max_rooms: u32, owner_user_id: u64) -> Self {
        Self {
            id,
            name,
            description,
            max_rooms: max_rooms.min(MAX_ROOMS_PER_STUDIO),
            owner_user_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStudioRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub max_rooms: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStudioRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_rooms: Option<u32>,
}
