//! # Chess Sync Server
//!
//! Process wrapper around [`room_sync`]: configuration, logging, signal
//! handling and the WebSocket transport that maps socket events onto the
//! room synchronization service.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;
pub mod transport;

pub use app::Application;
pub use cli::Args;
pub use config::AppConfig;
