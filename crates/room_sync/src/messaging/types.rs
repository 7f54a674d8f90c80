//! Message type definitions for client-server communication.
//!
//! Both directions are JSON objects tagged by a `type` field:
//!
//! ```json
//! { "type": "join", "key": "k3x9a0c1d2e4-0xabc", "user": "0xabc" }
//! { "type": "state_changed", "key": "k3x9a0c1d2e4-0xabc", "snapshot": { ... } }
//! ```

use crate::registry::MemberView;
use crate::snapshot::GameSnapshot;
use crate::types::{AccountKey, RoomKey};
use serde::{Deserialize, Serialize};

/// A message sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a new game room on `account` and join it.
    CreateGame {
        account: AccountKey,
        #[serde(default)]
        user: Option<String>,
    },
    /// Join an existing game room.
    Join {
        key: RoomKey,
        #[serde(default)]
        user: Option<String>,
    },
    /// Leave a game room.
    Leave { key: RoomKey },
    /// The sender just submitted a move for this room to the ledger.
    Mutate { key: RoomKey },
    /// Re-read the room's state from the ledger now.
    Refresh { key: RoomKey },
    /// Ask for the current lobby listing.
    ListGames,
    /// Keepalive.
    Ping,
}

/// A message sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The room's authoritative state changed (or, on join, its current state).
    StateChanged { key: RoomKey, snapshot: GameSnapshot },
    /// The room's member list changed.
    MembersChanged { key: RoomKey, members: Vec<MemberView> },
    /// A room became available in the lobby.
    RoomCreated { key: RoomKey },
    /// Lobby listing of every active room.
    CurrentGames { keys: Vec<RoomKey> },
    /// Confirmation that the session joined a room.
    Joined { key: RoomKey },
    /// Confirmation that the session left a room.
    Left { key: RoomKey },
    /// Keepalive response.
    Pong,
    /// A request from this session was rejected.
    Error { reason: String },
}

impl ServerEvent {
    /// The room this event concerns, if any.
    pub fn room(&self) -> Option<&RoomKey> {
        match self {
            ServerEvent::StateChanged { key, .. }
            | ServerEvent::MembersChanged { key, .. }
            | ServerEvent::RoomCreated { key }
            | ServerEvent::Joined { key }
            | ServerEvent::Left { key } => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "join",
            "key": "g1-0xabc",
            "user": "0xabc"
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                key: RoomKey::new("g1", "0xabc"),
                user: Some("0xabc".to_string()),
            }
        );

        let msg: ClientMessage =
            serde_json::from_value(json!({ "type": "create_game", "account": "0xabc" })).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CreateGame {
                account: AccountKey::new("0xabc"),
                user: None,
            }
        );

        let msg: ClientMessage = serde_json::from_value(json!({ "type": "list_games" })).unwrap();
        assert_eq!(msg, ClientMessage::ListGames);
    }

    #[test]
    fn test_client_message_rejects_bad_key() {
        let result = serde_json::from_value::<ClientMessage>(json!({
            "type": "leave",
            "key": "no_dash_here"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_shape() {
        let event = ServerEvent::CurrentGames {
            keys: vec![RoomKey::new("g1", "0xabc")],
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "current_games", "keys": ["g1-0xabc"] })
        );

        let event = ServerEvent::Error {
            reason: "Room not found: g1-0xabc".to_string(),
        };
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], "error");
        assert!(event.room().is_none());
    }
}
