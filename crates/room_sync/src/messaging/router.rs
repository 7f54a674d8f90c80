//! Message routing logic for dispatching client messages to the service.

use crate::error::{Result, SyncError};
use crate::messaging::{ClientMessage, ServerEvent};
use crate::service::RoomSyncService;
use crate::types::SessionId;
use tracing::debug;

/// Routes a raw client message to the matching service operation.
///
/// # Arguments
///
/// * `text` - The raw message text from the client (expected to be JSON)
/// * `session` - The session the message arrived on
/// * `service` - The synchronization service
///
/// # Returns
///
/// `Ok(())` if the message was handled. Any error belongs to the sending
/// session only; the transport replies with an `error` event and carries on.
///
/// # Example Message Format
///
/// ```json
/// { "type": "mutate", "key": "k3x9a0c1d2e4-0xabc" }
/// ```
pub async fn route_client_message(
    text: &str,
    session: SessionId,
    service: &RoomSyncService,
) -> Result<()> {
    let message: ClientMessage = serde_json::from_str(text)
        .map_err(|e| SyncError::InvalidMessage(format!("Invalid JSON: {e}")))?;

    debug!("📨 Routing {:?} from session {}", message, session);

    match message {
        ClientMessage::CreateGame { account, user } => {
            service.create_game(account, session, user).await?;
        }
        ClientMessage::Join { key, user } => {
            service.join(&key, session, user).await?;
        }
        ClientMessage::Leave { key } => {
            service.leave(&key, session).await?;
        }
        ClientMessage::Mutate { key } => {
            service.notify_mutation(&key).await?;
        }
        ClientMessage::Refresh { key } => {
            service.refresh(&key).await?;
        }
        ClientMessage::ListGames => {
            let keys = service.list_active_keys();
            service.send_to_session(session, ServerEvent::CurrentGames { keys });
        }
        ClientMessage::Ping => {
            service.send_to_session(session, ServerEvent::Pong);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::source::{AccountState, StateSource};
    use crate::types::{AccountKey, RoomKey};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EmptyLedger;

    #[async_trait]
    impl StateSource for EmptyLedger {
        async fn fetch_entity_state(&self, account: &AccountKey) -> Result<AccountState> {
            Ok(AccountState::new(account.clone(), Vec::new()))
        }
    }

    fn service() -> RoomSyncService {
        RoomSyncService::new(SyncConfig::default(), Arc::new(EmptyLedger))
    }

    #[tokio::test]
    async fn test_ping_and_list_games() {
        let service = service();
        let (session, mut rx) = service.connect();
        assert!(matches!(*rx.recv().await.unwrap(), ServerEvent::CurrentGames { .. }));

        route_client_message(r#"{"type":"ping"}"#, session, &service)
            .await
            .unwrap();
        assert_eq!(*rx.recv().await.unwrap(), ServerEvent::Pong);

        route_client_message(r#"{"type":"list_games"}"#, session, &service)
            .await
            .unwrap();
        assert_eq!(
            *rx.recv().await.unwrap(),
            ServerEvent::CurrentGames { keys: vec![] }
        );
    }

    #[tokio::test]
    async fn test_invalid_json_rejected() {
        let service = service();
        let (session, _rx) = service.connect();

        let result = route_client_message("not json", session, &service).await;
        assert!(matches!(result, Err(SyncError::InvalidMessage(_))));

        let result = route_client_message(r#"{"type":"teleport"}"#, session, &service).await;
        assert!(matches!(result, Err(SyncError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_join_unknown_game_is_not_found() {
        let service = service();
        let (session, _rx) = service.connect();

        let result =
            route_client_message(r#"{"type":"join","key":"g1-0xabc"}"#, session, &service).await;
        assert_eq!(result, Err(SyncError::NotFound(RoomKey::new("g1", "0xabc"))));
        assert_eq!(service.room_count(), 0);
    }

    #[tokio::test]
    async fn test_create_game_joins_creator() {
        let service = service();
        let (session, mut rx) = service.connect();
        rx.recv().await.unwrap();

        route_client_message(
            r#"{"type":"create_game","account":"0xabc","user":"0xabc"}"#,
            session,
            &service,
        )
        .await
        .unwrap();

        let keys = service.list_active_keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].account, AccountKey::new("0xabc"));
        assert_eq!(
            *rx.recv().await.unwrap(),
            ServerEvent::Joined {
                key: keys[0].clone()
            }
        );
    }
}
