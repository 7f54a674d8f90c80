//! # Room Sync
//!
//! Real-time room synchronization over a slow external ledger.
//!
//! Clients join *rooms*, each tied to one game stored on one ledger account.
//! The service keeps a cached snapshot per room, reconciles it against the
//! ledger on a fixed period, and pushes a snapshot to room members only when
//! something observable changed.
//!
//! ## Architecture Overview
//!
//! * **Registry** ([`registry`]) - the table of live rooms, their members and
//!   cached snapshots
//! * **Reconciler** ([`reconciler`]) - periodic and on-demand fetches,
//!   coalesced per account, ending in one diff-and-broadcast step
//! * **Fanout** ([`fanout`]) - join/leave/disconnect and per-room delivery
//! * **Sessions** ([`sessions`]) - connected sessions and their outbound
//!   queues
//! * **Service** ([`service`]) - the facade transports and mutation paths use
//!
//! ### Message Flow
//!
//! 1. A transport registers a session and routes its text frames through
//!    [`route_client_message`]
//! 2. Joins seed the room from a coalesced fetch and hand the joiner the
//!    cached snapshot
//! 3. The reconciler fetches each watched account once per cycle and
//!    broadcasts changed rooms
//! 4. Disconnects are treated as a leave of every joined room
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use room_sync::{LedgerClient, RoomSyncService, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> room_sync::Result<()> {
//! let ledger = Arc::new(LedgerClient::new("http://127.0.0.1:9292", "0xchess"));
//! let service = Arc::new(RoomSyncService::new(SyncConfig::default(), ledger));
//! service.start().await?;
//! // hand `service` to a transport ...
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fanout;
pub mod messaging;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod sessions;
pub mod snapshot;
pub mod source;
pub mod types;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use messaging::{route_client_message, ClientMessage, ServerEvent};
pub use reconciler::{CycleReport, FetchPolicy, SweepReport};
pub use registry::MemberView;
pub use service::RoomSyncService;
pub use sessions::{EventReceiver, EventSender};
pub use snapshot::{Fingerprint, GamePhase, GameSnapshot, NEW_GAME_FEN};
pub use source::{AccountState, LedgerClient, StateSource};
pub use types::{AccountKey, RoomKey, SessionId};
