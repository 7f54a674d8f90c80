//! Keeps cached room snapshots in step with the external source.
//!
//! Fetches are coalesced per account: at most one fetch per account is
//! outstanding at any time, and every caller interested in that account
//! awaits the same shared outcome. Two producers feed the reconciler (the
//! periodic cycle and out-of-band refresh requests) and both end in
//! [`Reconciler::apply`], the single diff-and-broadcast step.
//!
//! Fetch failures are absorbed here. Rooms keep their last good snapshot,
//! nothing is broadcast, and the next cycle tries again.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fanout::Fanout;
use crate::registry::RoomRegistry;
use crate::snapshot::{is_observable_change, GameSnapshot};
use crate::source::{AccountState, StateSource};
use crate::types::{AccountKey, RoomKey};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one coalesced fetch, shared by every waiter.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Arc<AccountState>>>>;

/// How a fetch request treats a fetch that is already running for the
/// same account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Reuse the running fetch's result.
    ShareInFlight,
    /// Fetch once more after the running fetch completes. Used after a
    /// mutation, when the running fetch may predate the change.
    AfterInFlight,
}

struct Flight {
    dirty: AtomicBool,
    done: SharedFetch,
}

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Summary of one lobby sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<RoomKey>,
    pub discovered: Vec<RoomKey>,
    pub active: usize,
}

/// The scheduled and on-demand reconciliation engine.
pub struct Reconciler {
    config: SyncConfig,
    source: Arc<dyn StateSource>,
    registry: Arc<RoomRegistry>,
    fanout: Arc<Fanout>,
    inflight: DashMap<AccountKey, Arc<Flight>>,
    next_sequence: AtomicU64,
    applied: DashMap<AccountKey, u64>,
    latest: DashMap<AccountKey, Arc<AccountState>>,
    discovered: DashSet<RoomKey>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("inflight", &self.inflight.len())
            .field("discovered", &self.discovered.len())
            .finish()
    }
}

impl Reconciler {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn StateSource>,
        registry: Arc<RoomRegistry>,
        fanout: Arc<Fanout>,
    ) -> Self {
        Self {
            config,
            source,
            registry,
            fanout,
            inflight: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            applied: DashMap::new(),
            latest: DashMap::new(),
            discovered: DashSet::new(),
        }
    }

    /// Whether a fetch for `account` is outstanding.
    pub fn is_in_flight(&self, account: &AccountKey) -> bool {
        self.inflight.contains_key(account)
    }

    /// Returns the shared outcome of a fetch for `account`, starting one if
    /// none is running.
    ///
    /// The fetch runs on its own task and cannot be cancelled by dropping
    /// the returned future. A panicking source resolves to
    /// [`SyncError::Fetch`] and frees the account for the next fetch.
    pub fn fetch(self: &Arc<Self>, account: &AccountKey, policy: FetchPolicy) -> SharedFetch {
        let (tx, rx) = oneshot::channel();

        let done = match self.inflight.entry(account.clone()) {
            Entry::Occupied(entry) => {
                if policy == FetchPolicy::AfterInFlight {
                    entry.get().dirty.store(true, Ordering::SeqCst);
                }
                debug!("Fetch for {} already in flight ({:?})", account, policy);
                return entry.get().done.clone();
            }
            Entry::Vacant(entry) => {
                let done: SharedFetch = async move {
                    match rx.await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(SyncError::ShutDown),
                    }
                }
                .boxed()
                .shared();
                entry.insert(Arc::new(Flight {
                    dirty: AtomicBool::new(false),
                    done: done.clone(),
                }));
                done
            }
        };

        let this = Arc::clone(self);
        let account = account.clone();
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(this.run_flight(&account))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    this.inflight.remove(&account);
                    error!("❌ Fetch for account {} panicked", account);
                    Err(SyncError::Fetch(format!("fetch for {} panicked", account)))
                }
            };
            let _ = tx.send(outcome);
        });
        done
    }

    async fn run_flight(&self, account: &AccountKey) -> Result<Arc<AccountState>> {
        loop {
            let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let outcome = match self.fetch_once(account).await {
                Ok(state) => {
                    let state = Arc::new(state);
                    self.apply(sequence, &state).await.map(|_| state)
                }
                Err(err) => {
                    warn!("⚠️ Fetch for account {} failed: {}", account, err);
                    Err(err)
                }
            };

            let cleared = self
                .inflight
                .remove_if(account, |_, flight| !flight.dirty.swap(false, Ordering::SeqCst))
                .is_some();
            if cleared || !self.inflight.contains_key(account) {
                return outcome;
            }
            debug!("Refetching account {} requested during flight", account);
        }
    }

    async fn fetch_once(&self, account: &AccountKey) -> Result<AccountState> {
        match timeout(self.config.fetch_timeout, self.source.fetch_entity_state(account)).await {
            Ok(Ok(state)) if &state.account != account => Err(SyncError::Fetch(format!(
                "source answered for {} when asked for {}",
                state.account, account
            ))),
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.config.fetch_timeout)),
        }
    }

    /// Diffs a fetched account against every room it backs and broadcasts
    /// the rooms whose snapshot changed. Returns the number of changed rooms.
    ///
    /// An entity absent from `state` leaves its room untouched. A result
    /// older than one already applied for the same account is discarded.
    pub async fn apply(&self, sequence: u64, state: &AccountState) -> Result<usize> {
        let account = &state.account;
        match self.applied.entry(account.clone()) {
            Entry::Occupied(entry) if *entry.get() >= sequence => {
                let message = format!(
                    "stale fetch #{} for {} after #{}",
                    sequence,
                    account,
                    entry.get()
                );
                warn!("⚠️ Discarding {}", message);
                return Err(SyncError::ConcurrencyViolation(message));
            }
            Entry::Occupied(mut entry) => {
                *entry.get_mut() = sequence;
            }
            Entry::Vacant(entry) => {
                entry.insert(sequence);
            }
        }

        let mut changed = 0;
        for (key, handle) in self.registry.rooms_for_account(account) {
            let Some(next) = state.game(&key.entity_id) else {
                debug!("Entity {} missing from fetch of {}; keeping cache", key.entity_id, account);
                continue;
            };

            let mut room = handle.write().await;
            if room.is_closed() || !is_observable_change(room.fingerprint(), next) {
                continue;
            }
            let snapshot = room.replace_snapshot(next.clone());
            let delivered = self.fanout.broadcast_change(&room, &snapshot);
            info!(
                "♟️ Room {} changed (phase {}), delivered to {} session(s)",
                key, snapshot.phase, delivered
            );
            changed += 1;
        }

        self.latest.insert(account.clone(), Arc::new(state.clone()));
        Ok(changed)
    }

    /// Starts a fetch for every watched account that has none running.
    ///
    /// Returns the started fetches without awaiting them.
    pub fn start_cycle(self: &Arc<Self>) -> (Vec<(AccountKey, SharedFetch)>, usize) {
        let mut started = Vec::new();
        let mut skipped = 0;

        for account in self.registry.list_watched_keys() {
            if self.is_in_flight(&account) {
                debug!("Skipping {}: fetch already in flight", account);
                skipped += 1;
                continue;
            }
            let fetch = self.fetch(&account, FetchPolicy::ShareInFlight);
            started.push((account, fetch));
        }
        (started, skipped)
    }

    /// Runs one reconciliation cycle to completion.
    pub async fn reconcile_once(self: &Arc<Self>) -> CycleReport {
        let (started, skipped) = self.start_cycle();
        let fetched = started.len();
        let outcomes = join_all(started.into_iter().map(|(_, fetch)| fetch)).await;

        CycleReport {
            fetched,
            skipped,
            failed: outcomes.iter().filter(|o| o.is_err()).count(),
        }
    }

    /// Expires idle rooms, updates the lobby catalog and pushes the active
    /// room list to every session.
    pub async fn sweep(&self) -> SweepReport {
        let expired = self.registry.expire_idle(self.config.room_grace_period).await;
        let watched = self.registry.list_watched_keys();

        self.latest.retain(|account, _| watched.contains(account));
        self.applied.retain(|account, _| watched.contains(account));
        self.discovered
            .retain(|key| watched.contains(&key.account) && !self.registry.contains(key));

        let mut discovered = Vec::new();
        let states: Vec<Arc<AccountState>> =
            self.latest.iter().map(|entry| Arc::clone(entry.value())).collect();
        for state in states {
            for game in state.games.values() {
                let key = RoomKey::new(game.game_id.clone(), state.account.as_str());
                if game.is_finished() {
                    self.discovered.remove(&key);
                    continue;
                }
                if self.registry.contains(&key) {
                    continue;
                }
                if self.discovered.insert(key.clone()) {
                    self.fanout.announce_room_created(&key);
                    discovered.push(key);
                }
            }
        }

        let keys = self.registry.list_keys();
        let active = keys.len();
        self.fanout.push_lobby(keys);

        debug!(
            "🧹 Lobby sweep: {} expired, {} discovered, {} active",
            expired.len(),
            discovered.len(),
            active
        );
        SweepReport {
            expired,
            discovered,
            active,
        }
    }

    /// Open games found on watched accounts that have no room yet, sorted.
    pub fn list_available_keys(&self) -> Vec<RoomKey> {
        self.discovered
            .iter()
            .map(|key| key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Last fetched snapshot of `key`'s entity, if its account was fetched.
    pub fn latest_snapshot(&self, key: &RoomKey) -> Option<GameSnapshot> {
        self.latest
            .get(&key.account)
            .and_then(|state| state.game(&key.entity_id).cloned())
    }

    /// Drives both producers until a shutdown signal arrives.
    ///
    /// Accounts received on `refresh_rx` are fetched immediately, outside
    /// the periodic cycle.
    pub async fn run(
        self: Arc<Self>,
        mut refresh_rx: mpsc::UnboundedReceiver<AccountKey>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut reconcile_tick = interval(self.config.reconcile_interval);
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_tick = interval(self.config.lobby_sweep_interval);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "🔄 Reconciler running (cycle {:?}, lobby sweep {:?}, fetch timeout {:?})",
            self.config.reconcile_interval,
            self.config.lobby_sweep_interval,
            self.config.fetch_timeout
        );

        loop {
            tokio::select! {
                _ = reconcile_tick.tick() => {
                    let (started, skipped) = self.start_cycle();
                    if !started.is_empty() || skipped > 0 {
                        debug!("Reconcile cycle: {} started, {} skipped", started.len(), skipped);
                    }
                }
                _ = sweep_tick.tick() => {
                    self.sweep().await;
                }
                Some(account) = refresh_rx.recv() => {
                    let _ = self.fetch(&account, FetchPolicy::ShareInFlight);
                }
                _ = shutdown_rx.recv() => {
                    info!("🛑 Reconciler stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionHub;
    use crate::snapshot::GamePhase;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StateSource for CountingSource {
        async fn fetch_entity_state(&self, account: &AccountKey) -> Result<AccountState> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut game = GameSnapshot::placeholder("g1");
            game.phase = GamePhase::InProgress;
            Ok(AccountState::new(account.clone(), vec![game]))
        }
    }

    #[derive(Default)]
    struct PanicOnceSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StateSource for PanicOnceSource {
        async fn fetch_entity_state(&self, account: &AccountKey) -> Result<AccountState> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("ledger client bug");
            }
            Ok(AccountState::new(account.clone(), vec![GameSnapshot::placeholder("g1")]))
        }
    }

    fn reconciler<S: StateSource>(source: Arc<S>) -> (Arc<Reconciler>, Arc<RoomRegistry>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = Arc::new(RoomRegistry::new(tx));
        let fanout = Arc::new(Fanout::new(Arc::clone(&registry), Arc::new(SessionHub::new())));
        let reconciler = Arc::new(Reconciler::new(
            SyncConfig::default(),
            source,
            Arc::clone(&registry),
            fanout,
        ));
        (reconciler, registry)
    }

    #[tokio::test]
    async fn test_stale_result_is_discarded() {
        let (reconciler, registry) = reconciler(Arc::new(CountingSource::default()));
        let key = RoomKey::new("g1", "0xabc");
        registry.get_or_create(&key, Some(GameSnapshot::placeholder("g1")));

        let mut newer = GameSnapshot::placeholder("g1");
        newer.phase = GamePhase::InProgress;
        let state = AccountState::new(key.account.clone(), vec![newer]);
        assert_eq!(reconciler.apply(2, &state).await, Ok(1));

        let older = AccountState::new(key.account.clone(), vec![GameSnapshot::placeholder("g1")]);
        let result = reconciler.apply(1, &older).await;
        assert!(matches!(result, Err(SyncError::ConcurrencyViolation(_))));

        let handle = registry.get(&key).unwrap();
        assert_eq!(handle.read().await.snapshot().phase, GamePhase::InProgress);
    }

    #[tokio::test]
    async fn test_shared_fetch_runs_once() {
        let source = Arc::new(CountingSource::default());
        let (reconciler, _registry) = reconciler(Arc::clone(&source));
        let account = AccountKey::new("0xabc");

        let first = reconciler.fetch(&account, FetchPolicy::ShareInFlight);
        let second = reconciler.fetch(&account, FetchPolicy::ShareInFlight);
        assert!(reconciler.is_in_flight(&account));

        let (a, b) = tokio::join!(first, second);
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!reconciler.is_in_flight(&account));
    }

    #[tokio::test]
    async fn test_refetch_after_in_flight() {
        let source = Arc::new(CountingSource::default());
        let (reconciler, _registry) = reconciler(Arc::clone(&source));
        let account = AccountKey::new("0xabc");

        let first = reconciler.fetch(&account, FetchPolicy::ShareInFlight);
        let second = reconciler.fetch(&account, FetchPolicy::AfterInFlight);
        let (a, b) = tokio::join!(first, second);
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cycle_without_rooms_fetches_nothing() {
        let source = Arc::new(CountingSource::default());
        let (reconciler, _registry) = reconciler(Arc::clone(&source));

        assert_eq!(reconciler.reconcile_once().await, CycleReport::default());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_source_does_not_block_account() {
        let source = Arc::new(PanicOnceSource::default());
        let (reconciler, _registry) = reconciler(Arc::clone(&source));
        let account = AccountKey::new("0xabc");

        let first = reconciler.fetch(&account, FetchPolicy::ShareInFlight).await;
        assert!(matches!(first, Err(SyncError::Fetch(_))));
        assert!(!reconciler.is_in_flight(&account));

        let second = reconciler.fetch(&account, FetchPolicy::ShareInFlight).await;
        assert!(second.unwrap().game("g1").is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
