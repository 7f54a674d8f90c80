//! Connected transport sessions and their outbound queues.
//!
//! Every session owns exactly one bounded outbound channel; all events for
//! the session travel through it, which is what keeps per-room events in
//! order for a given session. Delivery is fire-and-forget: a full or closed
//! queue drops the event.

use crate::error::{Result, SyncError};
use crate::messaging::ServerEvent;
use crate::types::{RoomKey, SessionId};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound queue of one session.
pub type EventSender = mpsc::Sender<Arc<ServerEvent>>;

/// Receiving end of a session's outbound queue, drained by the transport.
pub type EventReceiver = mpsc::Receiver<Arc<ServerEvent>>;

#[derive(Debug)]
struct SessionEntry {
    sender: EventSender,
    rooms: DashSet<RoomKey>,
    active: AtomicBool,
    connected_at: SystemTime,
}

/// Registry of connected sessions and the rooms each has joined.
#[derive(Debug, Default)]
pub struct SessionHub {
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers a session with its outbound queue.
    pub fn register(&self, session: SessionId, sender: EventSender) {
        let entry = Arc::new(SessionEntry {
            sender,
            rooms: DashSet::new(),
            active: AtomicBool::new(true),
            connected_at: SystemTime::now(),
        });
        self.sessions.insert(session, entry);
        info!("🔗 Session {} connected", session);
        debug!("Active sessions: {}", self.sessions.len());
    }

    /// Removes a session and returns the rooms it was still a member of.
    ///
    /// The session is marked inactive before its room set is read, so a join
    /// racing this call either shows up in the returned set or is refused.
    pub fn unregister(&self, session: &SessionId) -> Option<Vec<RoomKey>> {
        let (_, entry) = self.sessions.remove(session)?;
        entry.active.store(false, Ordering::SeqCst);
        let rooms: Vec<RoomKey> = entry.rooms.iter().map(|key| key.clone()).collect();

        let connected_for = entry.connected_at.elapsed().unwrap_or_default();
        info!(
            "👋 Session {} disconnected after {:?} ({} room(s) to leave)",
            session,
            connected_for,
            rooms.len()
        );
        Some(rooms)
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.sessions.contains_key(session)
    }

    /// Records that `session` joined `key`.
    ///
    /// Fails with [`SyncError::SessionNotFound`] if the session is gone or
    /// is being torn down.
    pub fn track_join(&self, session: &SessionId, key: &RoomKey) -> Result<()> {
        let entry = self
            .sessions
            .get(session)
            .map(|e| Arc::clone(e.value()))
            .ok_or(SyncError::SessionNotFound(*session))?;

        entry.rooms.insert(key.clone());
        if !entry.active.load(Ordering::SeqCst) {
            entry.rooms.remove(key);
            return Err(SyncError::SessionNotFound(*session));
        }
        Ok(())
    }

    pub fn track_leave(&self, session: &SessionId, key: &RoomKey) {
        if let Some(entry) = self.sessions.get(session) {
            entry.rooms.remove(key);
        }
    }

    pub fn rooms_of(&self, session: &SessionId) -> Vec<RoomKey> {
        self.sessions
            .get(session)
            .map(|entry| entry.rooms.iter().map(|key| key.clone()).collect())
            .unwrap_or_default()
    }

    /// Queues `event` for one session. Returns `false` if it was dropped.
    pub fn send(&self, session: &SessionId, event: Arc<ServerEvent>) -> bool {
        let Some(entry) = self.sessions.get(session) else {
            debug!("Dropping event for unknown session {}", session);
            return false;
        };

        match entry.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("⚠️ Outbound queue full for session {}; event dropped", session);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for session {}", session);
                false
            }
        }
    }

    /// Queues `event` for every connected session.
    pub fn send_to_all(&self, event: Arc<ServerEvent>) -> usize {
        let targets: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        targets
            .iter()
            .filter(|session| self.send(session, Arc::clone(&event)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
