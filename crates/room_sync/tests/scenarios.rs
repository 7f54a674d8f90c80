//! Longer flows: the join/mutate/join scenario, the lobby, and the
//! background reconciler driven by its own timers.

mod common;

use common::*;
use room_sync::{
    route_client_message, AccountKey, GamePhase, RoomKey, RoomSyncService, ServerEvent, SyncConfig,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_late_joiner_sees_latest_state() {
    let source = ScriptedSource::new();
    source.put("0xabc", game("g1", FEN_A, GamePhase::InProgress));
    let service = service(Arc::clone(&source));
    let key = RoomKey::new("g1", "0xabc");

    // X joins and receives A.
    let (x, mut rx_x) = service.connect();
    service.join(&key, x, Some("0xwhite".to_string())).await.unwrap();
    let events = drain(&mut rx_x);
    assert!(matches!(events[0], ServerEvent::CurrentGames { .. }));
    assert_eq!(events[1], ServerEvent::Joined { key: key.clone() });
    assert_eq!(state_changes(&events)[0].fen, FEN_A);

    // Unchanged cycle: nothing sent.
    service.reconcile_now().await;
    assert!(drain(&mut rx_x).is_empty());

    // A move lands and is reported.
    source.put("0xabc", game("g1", FEN_B, GamePhase::InProgress));
    let snapshot = service.notify_mutation(&key).await.unwrap();
    assert_eq!(snapshot.fen, FEN_B);
    let changes = state_changes(&drain(&mut rx_x));
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].fen, FEN_B);

    // Y joins afterwards and gets B straight away.
    let (y, mut rx_y) = service.connect();
    service.join(&key, y, Some("0xblack".to_string())).await.unwrap();
    let y_changes = state_changes(&drain(&mut rx_y));
    assert_eq!(y_changes.len(), 1);
    assert_eq!(y_changes[0].fen, FEN_B);

    // X learns about Y through the member list, not a state change.
    let x_events = drain(&mut rx_x);
    assert!(state_changes(&x_events).is_empty());
    match &x_events[..] {
        [ServerEvent::MembersChanged { members, .. }] => {
            let users: Vec<_> = members.iter().filter_map(|m| m.user.clone()).collect();
            assert_eq!(users.len(), 2);
            assert!(users.contains(&"0xblack".to_string()));
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn test_create_game_announces_to_lobby() {
    let source = ScriptedSource::new();
    let service = service(Arc::clone(&source));
    let (creator, mut rx_creator) = service.connect();
    let (watcher, mut rx_watcher) = service.connect();
    drain(&mut rx_creator);
    drain(&mut rx_watcher);

    let key = service
        .create_game(AccountKey::new("0xabc"), creator, None)
        .await
        .unwrap();
    assert_eq!(key.account.as_str(), "0xabc");

    let creator_events = drain(&mut rx_creator);
    assert_eq!(creator_events[0], ServerEvent::Joined { key: key.clone() });
    assert_eq!(
        state_changes(&creator_events)[0].fen,
        room_sync::NEW_GAME_FEN
    );
    assert_eq!(
        drain(&mut rx_watcher),
        vec![ServerEvent::RoomCreated { key: key.clone() }]
    );

    // The placeholder is not checked against the ledger, so a second
    // player can join before the game is on chain.
    service.join(&key, watcher, None).await.unwrap();
    assert_eq!(service.members(&key).await.unwrap().len(), 2);
    assert_eq!(source.calls("0xabc"), 0);
    drain(&mut rx_watcher);

    // Once the game lands on the ledger the next cycle picks it up.
    source.put("0xabc", game(&key.entity_id, FEN_A, GamePhase::Initialized));
    service.reconcile_now().await;
    assert_eq!(state_changes(&drain(&mut rx_watcher))[0].fen, FEN_A);
}

#[tokio::test]
async fn test_sweep_discovers_open_games_once() {
    let source = ScriptedSource::new();
    source.put("0xabc", game("g1", FEN_A, GamePhase::InProgress));
    source.put("0xabc", game("g2", FEN_A, GamePhase::Initialized));
    source.put("0xabc", game("g3", FEN_B, GamePhase::Finished));
    let service = service(Arc::clone(&source));
    let (s, mut rx) = service.connect();
    service.join(&RoomKey::new("g1", "0xabc"), s, None).await.unwrap();
    drain(&mut rx);

    let report = service.sweep_now().await;
    assert_eq!(report.discovered, vec![RoomKey::new("g2", "0xabc")]);
    assert_eq!(report.active, 1);
    assert_eq!(service.list_available_keys(), vec![RoomKey::new("g2", "0xabc")]);

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            ServerEvent::RoomCreated {
                key: RoomKey::new("g2", "0xabc")
            },
            ServerEvent::CurrentGames {
                keys: vec![RoomKey::new("g1", "0xabc")]
            },
        ]
    );

    // Already announced: the next sweep only pushes the lobby.
    let report = service.sweep_now().await;
    assert!(report.discovered.is_empty());
    assert_eq!(drain(&mut rx).len(), 1);

    // Once the account is no longer watched its games leave the catalog.
    service.leave(&RoomKey::new("g1", "0xabc"), s).await.unwrap();
    service.sweep_now().await;
    assert!(service.list_available_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_expires_rooms_nobody_joined() {
    let source = ScriptedSource::new();
    source.put("0xabc", game("g1", FEN_A, GamePhase::InProgress));
    let service = service(Arc::clone(&source));
    let key = RoomKey::new("g1", "0xabc");

    service.ensure_room(&key).await.unwrap();
    assert!(service.has_room(&key));
    assert!(service.sweep_now().await.expired.is_empty());

    tokio::time::advance(SyncConfig::default().room_grace_period + Duration::from_secs(1)).await;
    let report = service.sweep_now().await;
    assert_eq!(report.expired, vec![key.clone()]);
    assert!(!service.has_room(&key));
}

#[tokio::test(start_paused = true)]
async fn test_background_reconciler_pushes_changes() {
    let source = ScriptedSource::new();
    source.put("0xabc", game("g1", FEN_A, GamePhase::InProgress));
    let service = Arc::new(RoomSyncService::new(
        SyncConfig {
            reconcile_interval: Duration::from_secs(5),
            lobby_sweep_interval: Duration::from_secs(60),
            ..SyncConfig::default()
        },
        Arc::clone(&source) as Arc<dyn room_sync::StateSource>,
    ));
    service.start().await.unwrap();
    assert!(service.start().await.is_err());

    let key = RoomKey::new("g1", "0xabc");
    let (s, mut rx) = service.connect();
    route_client_message(r#"{"type":"join","key":"g1-0xabc"}"#, s, &service)
        .await
        .unwrap();
    drain(&mut rx);

    source.put("0xabc", game("g1", FEN_B, GamePhase::InProgress));
    tokio::time::sleep(Duration::from_secs(6)).await;

    let changes = state_changes(&drain(&mut rx));
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].fen, FEN_B);
    assert_eq!(service.snapshot(&key).await.unwrap().fen, FEN_B);

    service.shutdown().await;
}
