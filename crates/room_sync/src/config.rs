//! Runtime settings for the synchronization service.
//!
//! Plain durations and counts; file formats are the binary's concern.

use std::time::Duration;

/// Configuration for [`RoomSyncService`](crate::RoomSyncService).
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Period of the per-account reconciliation cycle.
    pub reconcile_interval: Duration,
    /// Period of the lobby sweep (grace expiry, lobby push, discovery).
    pub lobby_sweep_interval: Duration,
    /// Upper bound on a single external fetch. A hang becomes a failure.
    pub fetch_timeout: Duration,
    /// How long a room may exist without ever having had a member.
    pub room_grace_period: Duration,
    /// Capacity of each session's outbound event queue.
    pub session_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(5),
            lobby_sweep_interval: Duration::from_secs(7),
            fetch_timeout: Duration::from_secs(10),
            room_grace_period: Duration::from_secs(30),
            session_buffer: 256,
        }
    }
}
