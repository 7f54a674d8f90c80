//! The public facade over the synchronization core.
//!
//! [`RoomSyncService`] owns the registry, the session hub, fanout and the
//! reconciler, and is the only thing a transport or a mutation path needs
//! to hold. Nothing in the core is global; dropping the service (after
//! [`RoomSyncService::shutdown`]) releases everything.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fanout::Fanout;
use crate::messaging::ServerEvent;
use crate::reconciler::{CycleReport, FetchPolicy, Reconciler, SweepReport};
use crate::registry::{MemberView, RoomRegistry};
use crate::sessions::{EventReceiver, EventSender, SessionHub};
use crate::snapshot::GameSnapshot;
use crate::source::StateSource;
use crate::types::{AccountKey, RoomKey, SessionId};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Room synchronization service.
///
/// # Example
///
/// ```rust,no_run
/// use room_sync::{AccountKey, LedgerClient, RoomSyncService, SyncConfig};
/// use std::sync::Arc;
///
/// # async fn demo() -> room_sync::Result<()> {
/// let source = Arc::new(LedgerClient::new("http://127.0.0.1:9292", "0xchess"));
/// let service = Arc::new(RoomSyncService::new(SyncConfig::default(), source));
/// service.start().await?;
///
/// let (session, _events) = service.connect();
/// let key = service.create_game(AccountKey::new("0xabc"), session, None).await?;
/// service.leave(&key, session).await?;
///
/// service.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct RoomSyncService {
    config: SyncConfig,
    registry: Arc<RoomRegistry>,
    sessions: Arc<SessionHub>,
    fanout: Arc<Fanout>,
    reconciler: Arc<Reconciler>,
    refresh_rx: Mutex<Option<mpsc::UnboundedReceiver<AccountKey>>>,
    reconciler_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RoomSyncService {
    /// Builds the service around `source`. Nothing runs until
    /// [`start`](Self::start) is called.
    pub fn new(config: SyncConfig, source: Arc<dyn StateSource>) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let registry = Arc::new(RoomRegistry::new(refresh_tx));
        let sessions = Arc::new(SessionHub::new());
        let fanout = Arc::new(Fanout::new(Arc::clone(&registry), Arc::clone(&sessions)));
        let reconciler = Arc::new(Reconciler::new(
            config.clone(),
            source,
            Arc::clone(&registry),
            Arc::clone(&fanout),
        ));

        Self {
            config,
            registry,
            sessions,
            fanout,
            reconciler,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            reconciler_task: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// Spawns the background reconciler. Fails with [`SyncError::ShutDown`]
    /// if the service was already started once.
    pub async fn start(&self) -> Result<()> {
        let refresh_rx = self.refresh_rx.lock().await.take().ok_or(SyncError::ShutDown)?;
        let shutdown_rx = self.shutdown_tx.subscribe();
        let reconciler = Arc::clone(&self.reconciler);

        let task = tokio::spawn(reconciler.run(refresh_rx, shutdown_rx));
        *self.reconciler_task.lock().await = Some(task);

        info!("🚀 Room sync service started");
        Ok(())
    }

    /// Stops the background reconciler and waits for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.reconciler_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Reconciler task ended abnormally: {}", e);
            }
        }
        info!("✅ Room sync service stopped");
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // Sessions

    /// Registers a new session and returns its id with the receiving end of
    /// its outbound queue. The session immediately gets the lobby listing.
    pub fn connect(&self) -> (SessionId, EventReceiver) {
        let (tx, rx) = mpsc::channel(self.config.session_buffer);
        let session = SessionId::new();
        self.register_session(session, tx);
        (session, rx)
    }

    /// Registers a session whose id and queue the transport already owns.
    pub fn register_session(&self, session: SessionId, sender: EventSender) {
        self.sessions.register(session, sender);
        self.sessions.send(
            &session,
            Arc::new(ServerEvent::CurrentGames {
                keys: self.list_active_keys(),
            }),
        );
    }

    /// Removes `session` from every room it joined. Called by the transport
    /// when the connection closes.
    pub async fn disconnect(&self, session: SessionId) -> Result<Vec<RoomKey>> {
        self.fanout.on_session_disconnect(session).await
    }

    /// Queues an event for a single session. Returns `false` if it was dropped.
    pub fn send_to_session(&self, session: SessionId, event: ServerEvent) -> bool {
        self.sessions.send(&session, Arc::new(event))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // Rooms

    /// Makes sure a room exists for `key` and returns its cached snapshot.
    ///
    /// An absent room is only created if the entity exists on the external
    /// source; otherwise the call fails with [`SyncError::NotFound`].
    pub async fn ensure_room(&self, key: &RoomKey) -> Result<Arc<GameSnapshot>> {
        if let Some(handle) = self.registry.get(key) {
            return Ok(handle.read().await.snapshot());
        }
        let seed = self.fetch_entity(key).await?;
        let (handle, _) = self.registry.get_or_create(key, Some(seed));
        let snapshot = handle.read().await.snapshot();
        Ok(snapshot)
    }

    /// Joins `session` to the room named by `key`.
    ///
    /// The joiner receives the room's current snapshot right away. A key with
    /// no room and no matching entity on the source is rejected with
    /// [`SyncError::NotFound`] and no room is created.
    pub async fn join(
        &self,
        key: &RoomKey,
        session: SessionId,
        user: Option<String>,
    ) -> Result<Arc<GameSnapshot>> {
        if !self.sessions.contains(&session) {
            return Err(SyncError::SessionNotFound(session));
        }
        let seed = if self.registry.contains(key) {
            None
        } else {
            Some(self.fetch_entity(key).await?)
        };
        self.fanout.join(key, session, user, seed).await
    }

    /// Removes `session` from the room named by `key`. Returns whether the
    /// session was a member.
    pub async fn leave(&self, key: &RoomKey, session: SessionId) -> Result<bool> {
        self.fanout.leave(key, session).await
    }

    /// Opens a new game room on `account` and joins `session` to it.
    ///
    /// The game is not on the ledger yet, so the room starts from the
    /// placeholder snapshot and is announced to every connected session.
    pub async fn create_game(
        &self,
        account: AccountKey,
        session: SessionId,
        user: Option<String>,
    ) -> Result<RoomKey> {
        if !self.sessions.contains(&session) {
            return Err(SyncError::SessionNotFound(session));
        }
        let key = RoomKey::generate(account);
        let seed = GameSnapshot::placeholder(key.entity_id.clone());
        self.fanout.join(&key, session, user, Some(seed)).await?;
        self.fanout.announce_room_created(&key);
        info!("🆕 Game {} created by session {}", key, session);
        Ok(key)
    }

    /// Reports that a move was just submitted for the room named by `key`.
    ///
    /// Fetches the room's account out of cycle and broadcasts the result if
    /// it changed. Fails with [`SyncError::NotFound`] for an unknown room and
    /// with [`SyncError::IllegalStateTransition`] if the game already ended;
    /// neither failure broadcasts anything. A failing source is not an error
    /// here: the room keeps its cached snapshot, which is returned.
    pub async fn notify_mutation(&self, key: &RoomKey) -> Result<Arc<GameSnapshot>> {
        let handle = self
            .registry
            .get(key)
            .ok_or_else(|| SyncError::NotFound(key.clone()))?;

        let current = handle.read().await.snapshot();
        if current.is_finished() {
            return Err(SyncError::IllegalStateTransition {
                key: key.clone(),
                phase: current.phase.clone(),
            });
        }

        debug!("Mutation reported for {}", key);
        self.fetch_after_change(key).await?;
        let snapshot = handle.read().await.snapshot();
        Ok(snapshot)
    }

    /// Re-reads the room's account from the source now.
    pub async fn refresh(&self, key: &RoomKey) -> Result<Arc<GameSnapshot>> {
        let handle = self
            .registry
            .get(key)
            .ok_or_else(|| SyncError::NotFound(key.clone()))?;
        self.fetch_after_change(key).await?;
        let snapshot = handle.read().await.snapshot();
        Ok(snapshot)
    }

    /// Current snapshot of a room, if the room exists.
    pub async fn snapshot(&self, key: &RoomKey) -> Option<Arc<GameSnapshot>> {
        let handle = self.registry.get(key)?;
        let snapshot = handle.read().await.snapshot();
        Some(snapshot)
    }

    /// Current member list of a room, if the room exists.
    pub async fn members(&self, key: &RoomKey) -> Option<Vec<MemberView>> {
        let handle = self.registry.get(key)?;
        let members = handle.read().await.member_list();
        Some(members)
    }

    // Lobby

    /// Keys of every live room, sorted.
    pub fn list_active_keys(&self) -> Vec<RoomKey> {
        self.registry.list_keys()
    }

    /// Open games discovered on watched accounts that have no room yet.
    pub fn list_available_keys(&self) -> Vec<RoomKey> {
        self.reconciler.list_available_keys()
    }

    /// Runs one reconciliation cycle and waits for its fetches.
    pub async fn reconcile_now(&self) -> CycleReport {
        self.reconciler.reconcile_once().await
    }

    /// Runs one lobby sweep.
    pub async fn sweep_now(&self) -> SweepReport {
        self.reconciler.sweep().await
    }

    pub fn room_count(&self) -> usize {
        self.registry.len()
    }

    pub fn has_room(&self, key: &RoomKey) -> bool {
        self.registry.contains(key)
    }

    /// Whether a ledger fetch for `account` is outstanding.
    pub fn is_fetching(&self, account: &AccountKey) -> bool {
        self.reconciler.is_in_flight(account)
    }

    /// Out-of-cycle fetch for a live room. A failing source leaves the
    /// cached snapshot in place and is not the caller's error.
    async fn fetch_after_change(&self, key: &RoomKey) -> Result<()> {
        match self
            .reconciler
            .fetch(&key.account, FetchPolicy::AfterInFlight)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_fetch_failure() => {
                warn!("⚠️ Refresh of {} failed, keeping cached state: {}", key, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_entity(&self, key: &RoomKey) -> Result<GameSnapshot> {
        let state = self
            .reconciler
            .fetch(&key.account, FetchPolicy::ShareInFlight)
            .await?;
        state
            .game(&key.entity_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(key.clone()))
    }
}

impl Drop for RoomSyncService {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
