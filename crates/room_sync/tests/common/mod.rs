//! Shared helpers for the room_sync integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use room_sync::{
    AccountKey, AccountState, EventReceiver, GamePhase, GameSnapshot, Result, RoomSyncService,
    ServerEvent, StateSource, SyncConfig, SyncError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory ledger whose contents, latency and failures the test controls.
#[derive(Default)]
pub struct ScriptedSource {
    games: Mutex<HashMap<AccountKey, HashMap<String, GameSnapshot>>>,
    calls: Mutex<HashMap<AccountKey, usize>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, account: &str, game: GameSnapshot) {
        self.games
            .lock()
            .unwrap()
            .entry(AccountKey::new(account))
            .or_default()
            .insert(game.game_id.clone(), game);
    }

    pub fn remove(&self, account: &str, game_id: &str) {
        if let Some(games) = self.games.lock().unwrap().get_mut(&AccountKey::new(account)) {
            games.remove(game_id);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self, account: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&AccountKey::new(account))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl StateSource for ScriptedSource {
    async fn fetch_entity_state(&self, account: &AccountKey) -> Result<AccountState> {
        *self.calls.lock().unwrap().entry(account.clone()).or_default() += 1;

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Fetch("scripted failure".to_string()));
        }

        let games: Vec<GameSnapshot> = self
            .games
            .lock()
            .unwrap()
            .get(account)
            .map(|games| games.values().cloned().collect())
            .unwrap_or_default();
        Ok(AccountState::new(account.clone(), games))
    }
}

pub fn game(id: &str, fen: &str, phase: GamePhase) -> GameSnapshot {
    let mut snapshot = GameSnapshot::placeholder(id);
    snapshot.fen = fen.to_string();
    snapshot.phase = phase;
    snapshot.address1 = Some("0xwhite".to_string());
    snapshot
}

pub fn service(source: Arc<ScriptedSource>) -> RoomSyncService {
    RoomSyncService::new(SyncConfig::default(), source)
}

pub fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push((*event).clone());
    }
    events
}

pub fn state_changes(events: &[ServerEvent]) -> Vec<GameSnapshot> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::StateChanged { snapshot, .. } => Some(snapshot.clone()),
            _ => None,
        })
        .collect()
}

pub const FEN_A: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
pub const FEN_B: &str = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2";
