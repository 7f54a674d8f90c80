//! The external state source contract.
//!
//! The authoritative game state lives on a slow, eventually consistent
//! ledger. The rest of the core only ever talks to it through
//! [`StateSource::fetch_entity_state`], which reads every game stored on one
//! account in a single call.

pub mod ledger;

pub use ledger::{extract_games, LedgerClient};

use crate::error::Result;
use crate::snapshot::GameSnapshot;
use crate::types::AccountKey;
use async_trait::async_trait;
use std::collections::HashMap;

/// Every game stored on one ledger account, keyed by entity id.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    pub account: AccountKey,
    pub games: HashMap<String, GameSnapshot>,
}

impl AccountState {
    pub fn new(account: AccountKey, games: impl IntoIterator<Item = GameSnapshot>) -> Self {
        Self {
            account,
            games: games
                .into_iter()
                .map(|game| (game.game_id.clone(), game))
                .collect(),
        }
    }

    pub fn game(&self, entity_id: &str) -> Option<&GameSnapshot> {
        self.games.get(entity_id)
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

/// Read-only access to the authoritative state.
///
/// Implementations must be safe to call concurrently for different accounts
/// and may take seconds to answer. Callers wrap every call in a timeout.
#[async_trait]
pub trait StateSource: Send + Sync + 'static {
    async fn fetch_entity_state(&self, account: &AccountKey) -> Result<AccountState>;
}
