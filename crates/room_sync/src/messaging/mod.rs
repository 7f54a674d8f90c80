//! Client-server message protocol and routing.

pub mod router;
pub mod types;

pub use router::route_client_message;
pub use types::{ClientMessage, ServerEvent};
