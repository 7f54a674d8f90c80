//! Room membership and event delivery.
//!
//! Fanout is the only writer of room membership. Every broadcast is issued
//! while the room's write lock is held, so "read members, then send" is
//! atomic with respect to concurrent joins, leaves and snapshot updates.

use crate::error::{Result, SyncError};
use crate::messaging::ServerEvent;
use crate::registry::{Room, RoomRegistry};
use crate::sessions::SessionHub;
use crate::snapshot::GameSnapshot;
use crate::types::{RoomKey, SessionId};
use std::sync::Arc;
use tracing::{debug, info};

/// Join/leave handling and per-room broadcasts.
#[derive(Debug)]
pub struct Fanout {
    registry: Arc<RoomRegistry>,
    sessions: Arc<SessionHub>,
}

impl Fanout {
    pub fn new(registry: Arc<RoomRegistry>, sessions: Arc<SessionHub>) -> Self {
        Self { registry, sessions }
    }

    /// Adds `session` to the room named by `key`, creating the room if needed.
    ///
    /// The joiner receives `joined` followed by the room's cached snapshot,
    /// then every member (joiner included) receives the new member list.
    /// Joining a room the session is already in refreshes the joiner's view
    /// and changes nothing else.
    ///
    /// # Arguments
    ///
    /// * `key` - Room to join
    /// * `session` - Joining session; must be registered with the hub
    /// * `user` - Optional label shown in the member list
    /// * `seed` - Snapshot to start from if this call creates the room
    ///
    /// # Returns
    ///
    /// The snapshot delivered to the joiner, or
    /// [`SyncError::SessionNotFound`] if the session is gone.
    pub async fn join(
        &self,
        key: &RoomKey,
        session: SessionId,
        user: Option<String>,
        seed: Option<GameSnapshot>,
    ) -> Result<Arc<GameSnapshot>> {
        loop {
            let (handle, created) = self.registry.get_or_create(key, seed.clone());
            let mut room = handle.write().await;
            if room.is_closed() {
                debug!("Room {} closed while joining; retrying", key);
                continue;
            }

            if let Err(err) = self.sessions.track_join(&session, key) {
                let abandon = created && room.is_empty();
                drop(room);
                if abandon {
                    self.registry.remove(key).await;
                }
                return Err(err);
            }

            let added = room.add_member(session, user.clone());
            let snapshot = room.snapshot();

            self.sessions.send(&session, Arc::new(ServerEvent::Joined { key: key.clone() }));
            self.sessions.send(
                &session,
                Arc::new(ServerEvent::StateChanged {
                    key: key.clone(),
                    snapshot: (*snapshot).clone(),
                }),
            );
            self.broadcast_membership(&room);

            if added {
                info!(
                    "🎮 Session {} joined room {} ({} member(s))",
                    session,
                    key,
                    room.member_count()
                );
            }
            return Ok(snapshot);
        }
    }

    /// Removes `session` from the room named by `key`.
    ///
    /// Remaining members receive the new member list. When the last member
    /// leaves, the room is removed from the registry before this returns.
    /// Leaving a room the session is not in is a no-op that still confirms
    /// with `left` and never removes the room.
    pub async fn leave(&self, key: &RoomKey, session: SessionId) -> Result<bool> {
        self.sessions.track_leave(&session, key);
        let removed = self.remove_member(key, session).await;
        self.sessions.send(&session, Arc::new(ServerEvent::Left { key: key.clone() }));
        Ok(removed)
    }

    /// Leaves every room `session` had joined and forgets the session.
    ///
    /// Must be called from the transport's disconnect hook. Returns the
    /// rooms the session was removed from.
    pub async fn on_session_disconnect(&self, session: SessionId) -> Result<Vec<RoomKey>> {
        let rooms = self
            .sessions
            .unregister(&session)
            .ok_or(SyncError::SessionNotFound(session))?;

        let mut left = Vec::with_capacity(rooms.len());
        for key in rooms {
            if self.remove_member(&key, session).await {
                left.push(key);
            }
        }
        Ok(left)
    }

    async fn remove_member(&self, key: &RoomKey, session: SessionId) -> bool {
        let Some(handle) = self.registry.get(key) else {
            return false;
        };

        let (removed, now_empty) = {
            let mut room = handle.write().await;
            let removed = room.remove_member(&session);
            if removed {
                info!(
                    "🚪 Session {} left room {} ({} member(s))",
                    session,
                    key,
                    room.member_count()
                );
                self.broadcast_membership(&room);
            }
            (removed, removed && room.is_empty() && !room.is_closed())
        };

        if now_empty {
            self.registry.remove(key).await;
        }
        removed
    }

    /// Delivers `snapshot` to every current member of `room`, once each.
    ///
    /// The caller holds the room's lock. Delivery is fire-and-forget.
    pub fn broadcast_change(&self, room: &Room, snapshot: &GameSnapshot) -> usize {
        let event = Arc::new(ServerEvent::StateChanged {
            key: room.key().clone(),
            snapshot: snapshot.clone(),
        });
        self.deliver(room, event)
    }

    /// Delivers the current member list of `room` to all of its members.
    pub fn broadcast_membership(&self, room: &Room) -> usize {
        let event = Arc::new(ServerEvent::MembersChanged {
            key: room.key().clone(),
            members: room.member_list(),
        });
        self.deliver(room, event)
    }

    /// Tells every connected session that `key` is open for joining.
    pub fn announce_room_created(&self, key: &RoomKey) -> usize {
        debug!("📣 Announcing room {}", key);
        self.sessions.send_to_all(Arc::new(ServerEvent::RoomCreated { key: key.clone() }))
    }

    /// Pushes the lobby listing to every connected session.
    pub fn push_lobby(&self, keys: Vec<RoomKey>) -> usize {
        self.sessions.send_to_all(Arc::new(ServerEvent::CurrentGames { keys }))
    }

    fn deliver(&self, room: &Room, event: Arc<ServerEvent>) -> usize {
        room.member_ids()
            .iter()
            .filter(|session| self.sessions.send(session, Arc::clone(&event)))
            .count()
    }
}
