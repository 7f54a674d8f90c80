//! # Core Type Definitions
//!
//! Identifiers shared by every component of the synchronization core.
//!
//! - [`AccountKey`] - address of an account on the external ledger
//! - [`RoomKey`] - `(entity, account)` pair naming one room
//! - [`SessionId`] - a connected transport session
//!
//! Wrapper types keep the three kinds of identifier from being confused with
//! each other even though all of them are strings or UUIDs underneath.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Address of an account on the external ledger.
///
/// One account may back several rooms (a player with several games at
/// once), which is why fetches are scheduled per account and not per room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(pub String);

impl AccountKey {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite identifier of a room: the game entity plus the ledger account
/// that stores it.
///
/// The text form `<entity_id>-<account>` is the channel name used on the
/// wire and in the lobby listing. Entity ids never contain `-`, so parsing
/// splits at the first dash and the account keeps any dashes of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomKey {
    pub entity_id: String,
    pub account: AccountKey,
}

impl RoomKey {
    pub fn new(entity_id: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            account: AccountKey::new(account),
        }
    }

    /// Generates a fresh entity id for a game that is not on the ledger yet.
    pub fn generate(account: AccountKey) -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self {
            entity_id: simple[..12].to_string(),
            account,
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.entity_id, self.account)
    }
}

impl FromStr for RoomKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((entity, account)) if !entity.is_empty() && !account.is_empty() => {
                Ok(RoomKey::new(entity, account))
            }
            _ => Err(format!("invalid room key: {s:?}")),
        }
    }
}

impl TryFrom<String> for RoomKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomKey> for String {
    fn from(key: RoomKey) -> Self {
        key.to_string()
    }
}

/// Identifier of a connected transport session.
///
/// Sessions are owned by the transport layer; rooms only hold the id as a
/// back-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random session ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
