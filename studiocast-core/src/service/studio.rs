//! Studio, room and membership management.
//!
//! Owns the tenancy invariants: stream-key uniqueness (lookup bucket and
//! room record always agree), the per-studio room cap, refusal to delete an
//! actively publishing room, and the atomic cascade that removes every
//! child entity and index entry when a studio goes away.

use std::sync::Arc;

use crate::models::{
    membership::Role, studio::MAX_ROOMS_PER_STUDIO, CameraConfig, Membership, Room, RoomAnalytics,
    Studio, StudioAnalytics, User,
};
use crate::store::buckets::*;
use crate::store::{Store, WriteCtx};
use crate::{Error, Result};

pub struct StudioService {
    store: Arc<Store>,
}

impl StudioService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    // ---- identity ----------------------------------------------------

    pub fn create_user(&self, name: String, email: String) -> Result<User> {
        self.store.with_write(|tx| {
            let id = tx.next_id(&USERS)?;
            let user = User::new(id, name.clone(), email.clone());
            tx.put(&USERS, id, &user)?;
            Ok(user)
        })
    }

    pub fn get_user(&self, user_id: u64) -> Result<Option<User>> {
        self.store.with_read(|tx| tx.get(&USERS, user_id))
    }

    // ---- permissions -------------------------------------------------

    /// Role of `user_id` in `studio_id`, if any.
    pub fn role_of(&self, user_id: u64, studio_id: u64) -> Result<Option<Role>> {
        self.store.with_read(|tx| {
            Ok(tx
                .get(&MEMBERSHIPS, (user_id, studio_id))?
                .map(|m: Membership| m.role))
        })
    }

    /// Permission is "role >= min_role"; a site admin bypasses the
    /// per-studio check entirely.
    pub fn require_role(&self, user_id: u64, studio_id: u64, min_role: Role) -> Result<()> {
        let user = self
            .get_user(user_id)?
            .ok_or(Error::AuthRequired)?;
        if user.is_site_admin {
            return Ok(());
        }
        match self.role_of(user_id, studio_id)? {
            Some(role) if role >= min_role => Ok(()),
            _ => Err(Error::Forbidden(format!(
                "requires {} role or above",
                min_role.as_str()
            ))),
        }
    }

    // ---- studios -----------------------------------------------------

    pub fn create_studio(
        &self,
        owner_user_id: u64,
        name: String,
        description: String,
        max_rooms: Option<u32>,
    ) -> Result<Studio> {
        if name.trim().is_empty() {
            return Err(Error::invalid("studio name must not be empty"));
        }
        let max_rooms = max_rooms.unwrap_or(MAX_ROOMS_PER_STUDIO);
        if max_rooms == 0 || max_rooms > MAX_ROOMS_PER_STUDIO {
            return Err(Error::invalid(format!(
                "max_rooms must be in 1..={MAX_ROOMS_PER_STUDIO}"
            )));
        }
        self.store.with_write(|tx| {
            let id = tx.next_id(&STUDIOS)?;
            let studio = Studio::new(id, name.clone(), description.clone(), max_rooms, owner_user_id);
            tx.put(&STUDIOS, id, &studio)?;
            tx.put(&STUDIO_ANALYTICS, id, &StudioAnalytics::new(id))?;

            let membership = Membership::new(owner_user_id, id, Role::Owner);
            tx.put(&MEMBERSHIPS, (owner_user_id, id), &membership)?;
            tx.link(&MEMBERSHIPS_BY_USER, owner_user_id, id)?;
            tx.link(&MEMBERSHIPS_BY_STUDIO, id, owner_user_id)?;
            Ok(studio)
        })
    }

    pub fn get_studio(&self, studio_id: u64) -> Result<Option<Studio>> {
        self.store.with_read(|tx| tx.get(&STUDIOS, studio_id))
    }

    pub fn studios_for_user(&self, user_id: u64) -> Result<Vec<Studio>> {
        self.store.with_read(|tx| {
            let ids = tx.targets(&MEMBERSHIPS_BY_USER, user_id)?;
            let mut studios = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(studio) = tx.get(&STUDIOS, id)? {
                    studios.push(studio);
                }
            }
            Ok(studios)
        })
    }

    pub fn update_studio(
        &self,
        studio_id: u64,
        name: Option<String>,
        description: Option<String>,
        max_rooms: Option<u32>,
    ) -> Result<Studio> {
        self.store.with_write(|tx| {
            let mut studio: Studio = tx
                .get(&STUDIOS, studio_id)?
                .ok_or_else(|| Error::not_found("studio"))?;
            if let Some(name) = name.clone() {
                if name.trim().is_empty() {
                    return Err(Error::invalid("studio name must not be empty"));
                }
                studio.name = name;
            }
            if let Some(description) = description.clone() {
                studio.description = description;
            }
            if let Some(max_rooms) = max_rooms {
                if max_rooms == 0 || max_rooms > MAX_ROOMS_PER_STUDIO {
                    return Err(Error::invalid(format!(
                        "max_rooms must be in 1..={MAX_ROOMS_PER_STUDIO}"
                    )));
                }
                studio.max_rooms = max_rooms;
            }
            tx.put(&STUDIOS, studio_id, &studio)?;
            Ok(studio)
        })
    }

    /// Remove a studio and every child entity, atomically. Index entries
    /// referencing the studio or its rooms do not survive the commit.
    pub fn delete_studio(&self, studio_id: u64) -> Result<()> {
        self.store.with_write(|tx| {
            if tx.get::<_, Studio>(&STUDIOS, studio_id)?.is_none() {
                return Err(Error::not_found("studio"));
            }

            for room_id in tx.targets(&ROOMS_BY_STUDIO, studio_id)? {
                delete_room_children(tx, room_id)?;
                if let Some(room) = tx.get::<_, Room>(&ROOMS, room_id)? {
                    tx.release_stream_key(&room.stream_key)?;
                }
                tx.delete(&ROOMS, room_id)?;
            }
            tx.unlink_all(&ROOMS_BY_STUDIO, studio_id)?;

            // Studio-scoped codes (room-scoped ones went with their rooms).
            for code in tx.str_targets(&CODES_BY_STUDIO, studio_id)? {
                delete_code_record(tx, &code)?;
            }
            tx.unlink_all(&CODES_BY_STUDIO, studio_id)?;

            for stream_id in tx.targets(&STREAMS_BY_STUDIO, studio_id)? {
                tx.delete(&STREAMS, stream_id)?;
            }
            tx.unlink_all(&STREAMS_BY_STUDIO, studio_id)?;

            for user_id in tx.targets(&MEMBERSHIPS_BY_STUDIO, studio_id)? {
                tx.delete(&MEMBERSHIPS, (user_id, studio_id))?;
                tx.unlink(&MEMBERSHIPS_BY_USER, user_id, studio_id)?;
            }
            tx.unlink_all(&MEMBERSHIPS_BY_STUDIO, studio_id)?;

            tx.delete(&STUDIO_ANALYTICS, studio_id)?;
            tx.delete(&STUDIOS, studio_id)?;
            Ok(())
        })
    }

    // ---- rooms -------------------------------------------------------

    pub fn create_room(&self, studio_id: u64, room_number: u32, name: String) -> Result<Room> {
        if name.trim().is_empty() {
            return Err(Error::invalid("room name must not be empty"));
        }
        self.store.with_write(|tx| {
            let studio: Studio = tx
                .get(&STUDIOS, studio_id)?
                .ok_or_else(|| Error::not_found("studio"))?;
            let existing = tx.targets(&ROOMS_BY_STUDIO, studio_id)?;
            if existing.len() as u32 >= studio.max_rooms {
                return Err(Error::conflict(format!(
                    "studio is at its room limit ({})",
                    studio.max_rooms
                )));
            }

            let id = tx.next_id(&ROOMS)?;
            let mut room = Room::new(id, studio_id, room_number, name.clone());
            // Astronomically unlikely, but the lookup bucket is the
            // uniqueness authority, so regenerate on collision.
            let mut claimed = false;
            for _ in 0..3 {
                match tx.claim_stream_key(&room.stream_key, id) {
                    Ok(()) => {
                        claimed = true;
                        break;
                    }
                    Err(Error::Conflict(_)) => {
                        room.stream_key = crate::models::room::generate_stream_key();
                    }
                    Err(e) => return Err(e),
                }
            }
            if !claimed {
                return Err(Error::internal("could not allocate a unique stream key"));
            }
            tx.put(&ROOMS, id, &room)?;
            tx.link(&ROOMS_BY_STUDIO, studio_id, id)?;
            tx.put(&ROOM_ANALYTICS, id, &RoomAnalytics::new(id))?;
            Ok(room)
        })
    }

    pub fn get_room(&self, room_id: u64) -> Result<Option<Room>> {
        self.store.with_read(|tx| tx.get(&ROOMS, room_id))
    }

    pub fn rooms_for_studio(&self, studio_id: u64) -> Result<Vec<Room>> {
        self.store.with_read(|tx| {
            let mut rooms = Vec::new();
            for id in tx.targets(&ROOMS_BY_STUDIO, studio_id)? {
                if let Some(room) = tx.get(&ROOMS, id)? {
                    rooms.push(room);
                }
            }
            Ok(rooms)
        })
    }

    /// Delete a room. Refused while the room is actively publishing.
    pub fn delete_room(&self, room_id: u64) -> Result<()> {
        self.store.with_write(|tx| {
            let room: Room = tx
                .get(&ROOMS, room_id)?
                .ok_or_else(|| Error::not_found("room"))?;
            if room.is_active {
                return Err(Error::conflict("room is live; stop the stream first"));
            }
            delete_room_children(tx, room_id)?;
            tx.release_stream_key(&room.stream_key)?;
            tx.unlink(&ROOMS_BY_STUDIO, room.studio_id, room_id)?;
            tx.delete(&ROOMS, room_id)?;
            Ok(())
        })
    }

    /// Replace the room's stream key with a fresh one.
    pub fn rotate_stream_key(&self, room_id: u64) -> Result<Room> {
        self.store.with_write(|tx| {
            let mut room: Room = tx
                .get(&ROOMS, room_id)?
                .ok_or_else(|| Error::not_found("room"))?;
            if room.is_active {
                return Err(Error::conflict("room is live; stop the stream first"));
            }
            tx.release_stream_key(&room.stream_key)?;
            room.stream_key = crate::models::room::generate_stream_key();
            tx.claim_stream_key(&room.stream_key, room_id)?;
            tx.put(&ROOMS, room_id, &room)?;
            Ok(room)
        })
    }

    // ---- camera configs ----------------------------------------------

    pub fn set_camera_config(&self, room_id: u64, rtsp_url: String) -> Result<CameraConfig> {
        if !rtsp_url.starts_with("rtsp://") && !rtsp_url.starts_with("rtsps://") {
            return Err(Error::invalid("camera URL must be rtsp:// or rtsps://"));
        }
        self.store.with_write(|tx| {
            if tx.get::<_, Room>(&ROOMS, room_id)?.is_none() {
                return Err(Error::not_found("room"));
            }
            let config = CameraConfig {
                room_id,
                rtsp_url: rtsp_url.clone(),
            };
            tx.put(&CAMERA_CONFIGS, room_id, &config)?;
            Ok(config)
        })
    }

    pub fn camera_config(&self, room_id: u64) -> Result<Option<CameraConfig>> {
        self.store.with_read(|tx| tx.get(&CAMERA_CONFIGS, room_id))
    }

    pub fn delete_camera_config(&self, room_id: u64) -> Result<()> {
        self.store.with_write(|tx| {
            tx.delete(&CAMERA_CONFIGS, room_id)?;
            Ok(())
        })
    }

    // ---- memberships -------------------------------------------------

    pub fn add_member(&self, studio_id: u64, user_id: u64, role: Role) -> Result<Membership> {
        self.store.with_write(|tx| {
            if tx.get::<_, Studio>(&STUDIOS, studio_id)?.is_none() {
                return Err(Error::not_found("studio"));
            }
            if tx.get::<_, User>(&USERS, user_id)?.is_none() {
                return Err(Error::not_found("user"));
            }
            let membership = Membership::new(user_id, studio_id, role);
            tx.put(&MEMBERSHIPS, (user_id, studio_id), &membership)?;
            tx.link(&MEMBERSHIPS_BY_USER, user_id, studio_id)?;
            tx.link(&MEMBERSHIPS_BY_STUDIO, studio_id, user_id)?;
            Ok(membership)
        })
    }

    pub fn remove_member(&self, studio_id: u64, user_id: u64) -> Result<()> {
        self.store.with_write(|tx| {
            let existing: Option<Membership> = tx.get(&MEMBERSHIPS, (user_id, studio_id))?;
            let Some(membership) = existing else {
                return Err(Error::not_found("membership"));
            };
            if membership.role == Role::Owner {
                return Err(Error::conflict("cannot remove the studio owner"));
            }
            tx.delete(&MEMBERSHIPS, (user_id, studio_id))?;
            tx.unlink(&MEMBERSHIPS_BY_USER, user_id, studio_id)?;
            tx.unlink(&MEMBERSHIPS_BY_STUDIO, studio_id, user_id)?;
            Ok(())
        })
    }

    pub fn members(&self, studio_id: u64) -> Result<Vec<Membership>> {
        self.store.with_read(|tx| {
            let mut members = Vec::new();
            for user_id in tx.targets(&MEMBERSHIPS_BY_STUDIO, studio_id)? {
                if let Some(m) = tx.get(&MEMBERSHIPS, (user_id, studio_id))? {
                    members.push(m);
                }
            }
            Ok(members)
        })
    }
}

/// Delete everything hanging off one room except the room record itself:
/// camera config, analytics, codes (with sessions), schedules (with logs),
/// stream audit rows, and the index entries for all of them.
fn delete_room_children(tx: &WriteCtx, room_id: u64) -> Result<()> {
    tx.delete(&CAMERA_CONFIGS, room_id)?;
    tx.delete(&ROOM_ANALYTICS, room_id)?;

    for code in tx.str_targets(&CODES_BY_ROOM, room_id)? {
        delete_code_record(tx, &code)?;
    }
    tx.unlink_all(&CODES_BY_ROOM, room_id)?;

    for schedule_id in tx.targets(&SCHEDULES_BY_ROOM, room_id)? {
        for log_id in tx.targets(&LOGS_BY_SCHEDULE, schedule_id)? {
            tx.delete(&SCHEDULE_LOGS, log_id)?;
        }
        tx.unlink_all(&LOGS_BY_SCHEDULE, schedule_id)?;
        tx.delete(&SCHEDULES, schedule_id)?;
    }
    tx.unlink_all(&SCHEDULES_BY_ROOM, room_id)?;
    for log_id in tx.targets(&LOGS_BY_ROOM, room_id)? {
        tx.delete(&SCHEDULE_LOGS, log_id)?;
    }
    tx.unlink_all(&LOGS_BY_ROOM, room_id)?;

    for stream_id in tx.targets(&STREAMS_BY_ROOM, room_id)? {
        if let Some(stream) = tx.get::<_, crate::models::Stream>(&STREAMS, stream_id)? {
            tx.unlink(&STREAMS_BY_STUDIO, stream.studio_id, stream_id)?;
        }
        tx.delete(&STREAMS, stream_id)?;
    }
    tx.unlink_all(&STREAMS_BY_ROOM, room_id)?;
    Ok(())
}

/// Delete one access code with its sessions, analytics and creator index
/// entry. The caller owns the room/studio index cleanup.
pub(crate) fn delete_code_record(tx: &WriteCtx, code: &str) -> Result<()> {
    for token in tx.str_targets(&SESSIONS_BY_CODE, code)? {
        tx.delete(&CODE_SESSIONS, token.as_str())?;
    }
    tx.unlink_all(&SESSIONS_BY_CODE, code)?;
    tx.delete(&CODE_ANALYTICS, code)?;
    if let Some(record) = tx.get::<_, crate::models::AccessCode>(&ACCESS_CODES, code)? {
        tx.unlink(&CODES_BY_CREATOR, record.created_by_user_id, code)?;
        match record.code_type {
            crate::models::CodeType::Room => {
                tx.unlink(&CODES_BY_ROOM, record.target_id, code)?;
            }
            crate::models::CodeType::Studio => {
                tx.unlink(&CODES_BY_STUDIO, record.target_id, code)?;
            }
        }
    }
    tx.delete(&ACCESS_CODES, code)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CodeType;
    use chrono::Utc;

    fn service() -> (tempfile::TempDir, StudioService, Arc<Store>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(dir.path().join("test.redb")).expect("open"));
        (dir, StudioService::new(Arc::clone(&store)), store)
    }

    fn seed_studio(svc: &StudioService) -> (User, Studio) {
        let user = svc
            .create_user("Pat".to_string(), "pat@example.com".to_string())
            .expect("user");
        let studio = svc
            .create_studio(user.id, "Main".to_string(), String::new(), Some(10))
            .expect("studio");
        (user, studio)
    }

    #[test]
    fn test_owner_membership_created_with_studio() {
        let (_dir, svc, _store) = service();
        let (user, studio) = seed_studio(&svc);
        assert_eq!(svc.role_of(user.id, studio.id).expect("role"), Some(Role::Owner));
        assert!(svc.require_role(user.id, studio.id, Role::Admin).is_ok());
    }

    #[test]
    fn test_require_role_rejects_below_minimum() {
        let (_dir, svc, _store) = service();
        let (_owner, studio) = seed_studio(&svc);
        let viewer = svc
            .create_user("V".to_string(), "v@example.com".to_string())
            .expect("user");
        svc.add_member(studio.id, viewer.id, Role::Viewer).expect("member");
        assert!(matches!(
            svc.require_role(viewer.id, studio.id, Role::Admin),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_site_admin_bypasses_membership() {
        let (_dir, svc, store) = service();
        let (_owner, studio) = seed_studio(&svc);
        let admin = svc
            .create_user("Root".to_string(), "root@example.com".to_string())
            .expect("user");
        store
            .with_write(|tx| {
                let mut u: User = tx.get(&USERS, admin.id)?.expect("present");
                u.is_site_admin = true;
                tx.put(&USERS, admin.id, &u)
            })
            .expect("promote");
        assert!(svc.require_role(admin.id, studio.id, Role::Owner).is_ok());
    }

    #[test]
    fn test_room_cap_enforced() {
        let (_dir, svc, _store) = service();
        let user = svc
            .create_user("Pat".to_string(), "pat@example.com".to_string())
            .expect("user");
        let studio = svc
            .create_studio(user.id, "Tiny".to_string(), String::new(), Some(1))
            .expect("studio");
        svc.create_room(studio.id, 101, "A".to_string()).expect("room");
        assert!(matches!(
            svc.create_room(studio.id, 102, "B".to_string()),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_delete_room_refused_while_active() {
        let (_dir, svc, store) = service();
        let (_user, studio) = seed_studio(&svc);
        let room = svc.create_room(studio.id, 101, "A".to_string()).expect("room");
        store
            .with_write(|tx| {
                let mut r: Room = tx.get(&ROOMS, room.id)?.expect("present");
                r.is_active = true;
                tx.put(&ROOMS, room.id, &r)
            })
            .expect("activate");
        assert!(matches!(svc.delete_room(room.id), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_rotate_stream_key_keeps_lookup_consistent() {
        let (_dir, svc, store) = service();
        let (_user, studio) = seed_studio(&svc);
        let room = svc.create_room(studio.id, 101, "A".to_string()).expect("room");
        let old_key = room.stream_key.clone();

        let rotated = svc.rotate_stream_key(room.id).expect("rotate");
        assert_ne!(rotated.stream_key, old_key);

        let (old_owner, new_owner) = store
            .with_read(|tx| {
                Ok((
                    tx.room_by_stream_key(&old_key)?,
                    tx.room_by_stream_key(&rotated.stream_key)?,
                ))
            })
            .expect("lookup");
        assert_eq!(old_owner, None);
        assert_eq!(new_owner, Some(room.id));
    }

    #[test]
    fn test_studio_cascade_delete() {
        let (_dir, svc, store) = service();
        let (user, studio) = seed_studio(&svc);
        let room = svc.create_room(studio.id, 101, "A".to_string()).expect("room");
        svc.set_camera_config(room.id, "rtsp://cam.local/1".to_string())
            .expect("camera");

        // A room code with a session, plus a studio code.
        store
            .with_write(|tx| {
                let now = Utc::now();
                let code = crate::models::AccessCode {
                    code: "13579".to_string(),
                    code_type: CodeType::Room,
                    target_id: room.id,
                    created_by_user_id: user.id,
                    created_at: now,
                    expires_at: now + chrono::Duration::hours(2),
                    max_viewers: 0,
                    is_revoked: false,
                    label: String::new(),
                };
                tx.put(&ACCESS_CODES, "13579", &code)?;
                tx.link(&CODES_BY_ROOM, room.id, "13579")?;
                tx.link(&CODES_BY_CREATOR, user.id, "13579")?;
                tx.put(
                    &CODE_ANALYTICS,
                    "13579",
                    &crate::models::CodeAnalytics::new("13579".to_string()),
                )?;
                let session =
                    crate::models::CodeSession::new("13579".to_string(), "10.0.0.9".to_string(), String::new());
                tx.link(&SESSIONS_BY_CODE, "13579", session.token.as_str())?;
                tx.put(&CODE_SESSIONS, session.token.as_str(), &session)?;

                let studio_code = crate::models::AccessCode {
                    code: "24680".to_string(),
                    code_type: CodeType::Studio,
                    target_id: studio.id,
                    created_by_user_id: user.id,
                    created_at: now,
                    expires_at: now + chrono::Duration::hours(2),
                    max_viewers: 0,
                    is_revoked: false,
                    label: String::new(),
                };
                tx.put(&ACCESS_CODES, "24680", &studio_code)?;
                tx.link(&CODES_BY_STUDIO, studio.id, "24680")?;
                tx.link(&CODES_BY_CREATOR, user.id, "24680")?;
                Ok(())
            })
            .expect("seed codes");

        let stream_key = room.stream_key.clone();
        svc.delete_studio(studio.id).expect("cascade");

        store
            .with_read(|tx| {
                assert!(tx.get::<_, Studio>(&STUDIOS, studio.id)?.is_none());
                assert!(tx.get::<_, Room>(&ROOMS, room.id)?.is_none());
                assert!(tx.get::<_, CameraConfig>(&CAMERA_CONFIGS, room.id)?.is_none());
                assert!(tx
                    .get::<_, crate::models::AccessCode>(&ACCESS_CODES, "13579")?
                    .is_none());
                assert!(tx
                    .get::<_, crate::models::AccessCode>(&ACCESS_CODES, "24680")?
                    .is_none());
                assert!(tx.room_by_stream_key(&stream_key)?.is_none());
                assert!(tx.targets(&ROOMS_BY_STUDIO, studio.id)?.is_empty());
                assert!(tx.str_targets(&CODES_BY_ROOM, room.id)?.is_empty());
                assert!(tx.str_targets(&CODES_BY_STUDIO, studio.id)?.is_empty());
                assert!(tx.str_targets(&SESSIONS_BY_CODE, "13579")?.is_empty());
                assert!(tx.targets(&MEMBERSHIPS_BY_STUDIO, studio.id)?.is_empty());
                assert!(tx.str_targets(&CODES_BY_CREATOR, user.id)?.is_empty());
                Ok(())
            })
            .expect("verify");
    }

    #[test]
    fn test_owner_cannot_be_removed() {
        let (_dir, svc, _store) = service();
        let (user, studio) = seed_studio(&svc);
        assert!(matches!(
            svc.remove_member(studio.id, user.id),
            Err(Error::Conflict(_))
        ));
    }
}
