//! Error types for the room synchronization core.
//!
//! Errors raised by the external state source are absorbed by the reconciler
//! and never reach subscribers. Errors raised by caller-facing operations
//! (join, leave, mutate) are returned to the immediate caller.

use crate::types::{RoomKey, SessionId};
use crate::snapshot::GamePhase;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the synchronization service.
///
/// The type is `Clone` because a single fetch outcome is shared between every
/// caller awaiting the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The external source was unreachable or returned malformed data.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// The external source did not answer within the configured timeout.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The room key does not correspond to any entity on the external source.
    #[error("Room not found: {0}")]
    NotFound(RoomKey),

    /// A mutation was reported for a room whose game already ended.
    #[error("Illegal state transition for {key}: game is {phase}")]
    IllegalStateTransition { key: RoomKey, phase: GamePhase },

    /// Two fetches for the same key were observed in flight.
    #[error("Concurrency violation: {0}")]
    ConcurrencyViolation(String),

    /// The session is not registered with the service.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// A client message could not be parsed or carried invalid fields.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The service has been shut down.
    #[error("Service is shut down")]
    ShutDown,
}

impl SyncError {
    /// Whether the error originated at the external state source.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, SyncError::Fetch(_) | SyncError::Timeout(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Fetch(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Fetch(format!("malformed ledger data: {err}"))
    }
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
