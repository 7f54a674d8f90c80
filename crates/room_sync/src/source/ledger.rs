//! JSON-RPC client for the ledger that stores chess games.
//!
//! `lasr_getAccount` returns the account as a JSON-encoded *string*. Inside
//! it, each program keeps a flat data map; the chess program stores games
//! under keys of the form `game-<gameId>-<property>`.

use super::{AccountState, StateSource};
use crate::error::{Result, SyncError};
use crate::snapshot::{current_timestamp_ms, GamePhase, GameSnapshot, NEW_GAME_FEN};
use crate::types::AccountKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

const GET_ACCOUNT_METHOD: &str = "lasr_getAccount";
const GAME_KEY_PREFIX: &str = "game-";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: [&'a str; 1],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Ledger-backed [`StateSource`].
#[derive(Debug, Clone)]
pub struct LedgerClient {
    http: reqwest::Client,
    rpc_url: String,
    program_address: String,
}

impl LedgerClient {
    /// Create a client for the given RPC endpoint and chess program address.
    pub fn new(rpc_url: impl Into<String>, program_address: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
            program_address: program_address.into(),
        }
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Extracts the chess games from a decoded `lasr_getAccount` result.
    ///
    /// An account that never interacted with the program has no data map;
    /// that is an empty game set, not an error.
    pub fn games_from_account(&self, account: &AccountKey, raw: &Value) -> AccountState {
        let data = raw
            .get("programs")
            .and_then(|programs| programs.get(&self.program_address))
            .and_then(|program| program.get("data"))
            .and_then(Value::as_object);

        match data {
            Some(data) => AccountState::new(account.clone(), extract_games(data)),
            None => AccountState::new(account.clone(), Vec::new()),
        }
    }
}

#[async_trait]
impl StateSource for LedgerClient {
    async fn fetch_entity_state(&self, account: &AccountKey) -> Result<AccountState> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method: GET_ACCOUNT_METHOD,
            params: [account.as_str()],
            id: 1,
        };
        debug!("Fetching ledger account {} from {}", account, self.rpc_url);

        let response = self.http.post(&self.rpc_url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(SyncError::Fetch(format!(
                "ledger returned status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body: RpcResponse = response.json().await?;
        if let Some(err) = body.error {
            return Err(SyncError::Fetch(format!(
                "ledger rpc error {}: {}",
                err.code, err.message
            )));
        }

        let encoded = body
            .result
            .ok_or_else(|| SyncError::Fetch("ledger response has no result".to_string()))?;
        let raw: Value = serde_json::from_str(&encoded)?;

        Ok(self.games_from_account(account, &raw))
    }
}

/// Groups `game-<gameId>-<property>` entries into snapshots.
///
/// Games without `address1` are incomplete records and are dropped. Missing
/// `fen` means no move has been made yet.
pub fn extract_games(data: &Map<String, Value>) -> Vec<GameSnapshot> {
    let mut fields: BTreeMap<&str, BTreeMap<&str, String>> = BTreeMap::new();

    for (key, value) in data {
        let Some(rest) = key.strip_prefix(GAME_KEY_PREFIX) else {
            continue;
        };
        let (game_id, property) = match rest.split_once('-') {
            Some((id, property)) => (id, Some(property)),
            None => (rest, None),
        };
        if game_id.is_empty() {
            continue;
        }

        let entry = fields.entry(game_id).or_default();
        if let Some(property) = property {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            entry.insert(property, text);
        }
    }

    let fetched_at_ms = current_timestamp_ms();
    fields
        .into_iter()
        .filter_map(|(game_id, mut props)| {
            let address1 = props.remove("address1")?;
            Some(GameSnapshot {
                game_id: game_id.to_string(),
                fen: props.remove("fen").unwrap_or_else(|| NEW_GAME_FEN.to_string()),
                phase: props
                    .remove("gameState")
                    .map(GamePhase::from)
                    .unwrap_or(GamePhase::Initialized),
                wager: props.remove("wager"),
                address1: Some(address1),
                address2: props.remove("address2"),
                winner_address: props.remove("winnerAddress"),
                created_at: props.remove("createdAt"),
                game_type: props.remove("type"),
                fetched_at_ms,
            })
        })
        .collect()
}
