//! The in-memory table of rooms.
//!
//! Each room sits behind its own `RwLock`, and the table is a sharded
//! `DashMap`. Nothing holds a map shard while waiting on a room lock, and
//! nothing holds a room lock across an external fetch.
//!
//! A room exists while it has at least one member, or while it is inside
//! its grace period waiting for the first member to arrive. Removal only
//! happens through [`RoomRegistry::remove`] (member set emptied) and
//! [`RoomRegistry::expire_idle`] (grace period over).

use crate::snapshot::{Fingerprint, GameSnapshot};
use crate::types::{AccountKey, RoomKey, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shared handle to one room.
pub type RoomHandle = Arc<RwLock<Room>>;

/// One member entry as shown in membership broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
    pub session_id: SessionId,
    pub user: Option<String>,
}

#[derive(Debug, Clone)]
struct Member {
    user: Option<String>,
}

/// A synchronization unit: the subscribers of one game plus the last known
/// authoritative state of that game.
#[derive(Debug)]
pub struct Room {
    key: RoomKey,
    members: HashMap<SessionId, Member>,
    snapshot: Arc<GameSnapshot>,
    fingerprint: Fingerprint,
    last_changed_at: Instant,
    created_at: Instant,
    closed: bool,
}

impl Room {
    fn new(key: RoomKey, seed: Option<GameSnapshot>) -> Self {
        let snapshot = seed.unwrap_or_else(|| GameSnapshot::placeholder(key.entity_id.clone()));
        let now = Instant::now();
        Self {
            fingerprint: snapshot.fingerprint(),
            snapshot: Arc::new(snapshot),
            key,
            members: HashMap::new(),
            last_changed_at: now,
            created_at: now,
            closed: false,
        }
    }

    pub fn key(&self) -> &RoomKey {
        &self.key
    }

    /// The cached snapshot. Cloning the `Arc` never observes a partial update.
    pub fn snapshot(&self) -> Arc<GameSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn last_changed_at(&self) -> Instant {
        self.last_changed_at
    }

    /// Replaces the cached snapshot as a whole.
    pub fn replace_snapshot(&mut self, snapshot: GameSnapshot) -> Arc<GameSnapshot> {
        self.fingerprint = snapshot.fingerprint();
        self.snapshot = Arc::new(snapshot);
        self.last_changed_at = Instant::now();
        Arc::clone(&self.snapshot)
    }

    /// Adds a member; returns `false` if the session was already a member.
    pub fn add_member(&mut self, session: SessionId, user: Option<String>) -> bool {
        match self.members.get_mut(&session) {
            Some(existing) => {
                if user.is_some() {
                    existing.user = user;
                }
                false
            }
            None => {
                self.members.insert(session, Member { user });
                true
            }
        }
    }

    pub fn remove_member(&mut self, session: &SessionId) -> bool {
        self.members.remove(session).is_some()
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.members.contains_key(session)
    }

    pub fn member_ids(&self) -> Vec<SessionId> {
        self.members.keys().copied().collect()
    }

    /// Members sorted by session id.
    pub fn member_list(&self) -> Vec<MemberView> {
        let mut list: Vec<MemberView> = self
            .members
            .iter()
            .map(|(session_id, member)| MemberView {
                session_id: *session_id,
                user: member.user.clone(),
            })
            .collect();
        list.sort_by_key(|m| m.session_id);
        list
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// A closed room has been removed from the registry; joiners that still
    /// hold its handle must look the key up again.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn grace_expired(&self, now: Instant, grace: Duration) -> bool {
        self.members.is_empty() && now.duration_since(self.created_at) >= grace
    }
}

/// Owner of every live room.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: DashMap<RoomKey, RoomHandle>,
    refresh_tx: mpsc::UnboundedSender<AccountKey>,
}

impl RoomRegistry {
    /// Creates an empty registry. Accounts of rooms created without a seed
    /// snapshot are pushed to `refresh_tx` for an immediate fetch.
    pub fn new(refresh_tx: mpsc::UnboundedSender<AccountKey>) -> Self {
        Self {
            rooms: DashMap::new(),
            refresh_tx,
        }
    }

    /// Returns the room for `key`, creating it if absent.
    ///
    /// Exactly one room exists per key at a time even under concurrent
    /// calls. The boolean is `true` when this call created the room. A room
    /// created without `seed` starts from the placeholder snapshot and its
    /// account is queued for an out-of-band fetch.
    pub fn get_or_create(&self, key: &RoomKey, seed: Option<GameSnapshot>) -> (RoomHandle, bool) {
        match self.rooms.entry(key.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let needs_fetch = seed.is_none();
                let handle = Arc::new(RwLock::new(Room::new(key.clone(), seed)));
                entry.insert(Arc::clone(&handle));
                info!("🏠 Room {} created", key);

                if needs_fetch && self.refresh_tx.send(key.account.clone()).is_err() {
                    warn!("Refresh queue closed; room {} waits for the next cycle", key);
                }
                (handle, true)
            }
        }
    }

    pub fn get(&self, key: &RoomKey) -> Option<RoomHandle> {
        self.rooms.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &RoomKey) -> bool {
        self.rooms.contains_key(key)
    }

    /// Removes the room if, and only if, its member set is empty right now.
    ///
    /// A join that lands between the caller's last leave and this call keeps
    /// the room alive.
    pub async fn remove(&self, key: &RoomKey) -> bool {
        let Some(handle) = self.get(key) else {
            return false;
        };

        let mut room = handle.write().await;
        if room.closed || !room.is_empty() {
            return false;
        }

        let removed = self
            .rooms
            .remove_if(key, |_, current| Arc::ptr_eq(current, &handle))
            .is_some();
        if removed {
            room.closed = true;
            info!("🧹 Room {} removed", key);
        }
        removed
    }

    /// Removes memberless rooms whose grace period is over.
    pub async fn expire_idle(&self, grace: Duration) -> Vec<RoomKey> {
        let now = Instant::now();
        let mut expired = Vec::new();

        for (key, handle) in self.entries() {
            let mut room = handle.write().await;
            if room.closed || !room.grace_expired(now, grace) {
                continue;
            }
            if self
                .rooms
                .remove_if(&key, |_, current| Arc::ptr_eq(current, &handle))
                .is_some()
            {
                room.closed = true;
                debug!("Room {} expired without members", key);
                expired.push(key);
            }
        }
        expired
    }

    /// Distinct accounts backing at least one room, as of this call.
    pub fn list_watched_keys(&self) -> HashSet<AccountKey> {
        self.rooms
            .iter()
            .map(|entry| entry.key().account.clone())
            .collect()
    }

    /// Every room key, sorted.
    pub fn list_keys(&self) -> Vec<RoomKey> {
        self.rooms
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rooms backed by `account`, collected before any room lock is taken.
    pub fn rooms_for_account(&self, account: &AccountKey) -> Vec<(RoomKey, RoomHandle)> {
        self.rooms
            .iter()
            .filter(|entry| &entry.key().account == account)
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn entries(&self) -> Vec<(RoomKey, RoomHandle)> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
