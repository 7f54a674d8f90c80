//! Game state snapshots and the fingerprint used to detect observable change.
//!
//! A [`GameSnapshot`] is replaced as a whole, never patched field by field.
//! Two snapshots are equal when every externally observable field is equal;
//! `fetched_at_ms` is bookkeeping and takes no part in equality or in the
//! [`Fingerprint`].

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Board position of a game that has not seen a move yet.
pub const NEW_GAME_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Lifecycle phase of a game as recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GamePhase {
    Initialized,
    InProgress,
    Finished,
    Unknown(String),
}

impl GamePhase {
    /// A finished game accepts no further moves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GamePhase::Finished)
    }

    fn as_ledger_str(&self) -> &str {
        match self {
            GamePhase::Initialized => "initialized",
            GamePhase::InProgress => "inProgress",
            GamePhase::Finished => "finished",
            GamePhase::Unknown(raw) => raw,
        }
    }
}

impl From<String> for GamePhase {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "initialized" => GamePhase::Initialized,
            "inProgress" => GamePhase::InProgress,
            "finished" => GamePhase::Finished,
            _ => GamePhase::Unknown(raw),
        }
    }
}

impl From<GamePhase> for String {
    fn from(phase: GamePhase) -> Self {
        phase.as_ledger_str().to_string()
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GamePhase::Initialized => f.write_str("initialized"),
            GamePhase::InProgress => f.write_str("in progress"),
            GamePhase::Finished => f.write_str("finished"),
            GamePhase::Unknown(raw) => write!(f, "unknown ({raw})"),
        }
    }
}

/// Comparable digest of a snapshot's observable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

/// Authoritative state of one game, as last read from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub game_id: String,
    pub fen: String,
    pub phase: GamePhase,
    pub wager: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub winner_address: Option<String>,
    pub created_at: Option<String>,
    pub game_type: Option<String>,
    /// When this snapshot was read, in milliseconds since the Unix epoch.
    pub fetched_at_ms: u64,
}

impl GameSnapshot {
    /// Stand-in state for a room that exists before its first fetch.
    pub fn placeholder(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            fen: NEW_GAME_FEN.to_string(),
            phase: GamePhase::Initialized,
            wager: None,
            address1: None,
            address2: None,
            winner_address: None,
            created_at: None,
            game_type: None,
            fetched_at_ms: current_timestamp_ms(),
        }
    }

    /// Computes the fingerprint over every observable field.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = DefaultHasher::new();
        self.hash_observable(&mut hasher);
        Fingerprint(hasher.finish())
    }

    fn hash_observable<H: Hasher>(&self, state: &mut H) {
        self.game_id.hash(state);
        self.fen.hash(state);
        self.phase.hash(state);
        self.wager.hash(state);
        self.address1.hash(state);
        self.address2.hash(state);
        self.winner_address.hash(state);
        self.created_at.hash(state);
        self.game_type.hash(state);
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }
}

impl PartialEq for GameSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.game_id == other.game_id
            && self.fen == other.fen
            && self.phase == other.phase
            && self.wager == other.wager
            && self.address1 == other.address1
            && self.address2 == other.address2
            && self.winner_address == other.winner_address
            && self.created_at == other.created_at
            && self.game_type == other.game_type
    }
}

impl Eq for GameSnapshot {}

/// Decides whether moving from `previous` to `next` is visible to subscribers.
///
/// Compares fingerprints only; this runs once per room per reconcile cycle
/// and the unchanged case is by far the common one.
pub fn is_observable_change(previous: Fingerprint, next: &GameSnapshot) -> bool {
    previous != next.fingerprint()
}

/// Current time in milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(fen: &str) -> GameSnapshot {
        GameSnapshot {
            fen: fen.to_string(),
            phase: GamePhase::InProgress,
            address1: Some("0xwhite".to_string()),
            ..GameSnapshot::placeholder("g1")
        }
    }

    #[test]
    fn test_fetch_time_excluded_from_equality() {
        let a = snapshot(NEW_GAME_FEN);
        let mut b = a.clone();
        b.fetched_at_ms = a.fetched_at_ms + 5_000;

        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(!is_observable_change(a.fingerprint(), &b));
    }

    #[test]
    fn test_any_observable_field_changes_fingerprint() {
        let base = snapshot(NEW_GAME_FEN);

        let mut moved = base.clone();
        moved.fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1".to_string();
        assert!(is_observable_change(base.fingerprint(), &moved));

        let mut finished = base.clone();
        finished.phase = GamePhase::Finished;
        assert!(is_observable_change(base.fingerprint(), &finished));

        let mut joined = base.clone();
        joined.address2 = Some("0xblack".to_string());
        assert!(is_observable_change(base.fingerprint(), &joined));
    }

    #[test]
    fn test_phase_ledger_strings() {
        assert_eq!(GamePhase::from("inProgress".to_string()), GamePhase::InProgress);
        assert_eq!(GamePhase::from("finished".to_string()), GamePhase::Finished);
        assert_eq!(
            GamePhase::from("abandoned".to_string()),
            GamePhase::Unknown("abandoned".to_string())
        );
        assert_eq!(String::from(GamePhase::InProgress), "inProgress");
        assert!(GamePhase::Finished.is_terminal());
        assert!(!GamePhase::Initialized.is_terminal());
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let snap = snapshot(NEW_GAME_FEN);
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["gameId"], "g1");
        assert_eq!(value["phase"], "inProgress");
        assert_eq!(value["address1"], "0xwhite");
    }
}
