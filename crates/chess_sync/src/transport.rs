//! WebSocket transport.
//!
//! Each accepted connection becomes one session of the [`RoomSyncService`].
//! Incoming text frames go through the message router; outgoing events are
//! drained from the session's queue by a dedicated writer task, so a slow
//! client never blocks a broadcast.

use futures::{SinkExt, StreamExt};
use room_sync::{route_client_message, EventReceiver, RoomSyncService, ServerEvent, SessionId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsSink = futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

/// Accepts WebSocket connections until a shutdown signal arrives.
///
/// # Arguments
///
/// * `listener` - Bound TCP listener
/// * `service` - Service every connection is attached to
/// * `max_connections` - Connections beyond this count are refused
/// * `shutdown` - Stops the accept loop when it fires
pub async fn serve(
    listener: TcpListener,
    service: Arc<RoomSyncService>,
    max_connections: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let limiter = Arc::new(Semaphore::new(max_connections));
    info!("🌐 Listening for WebSocket connections on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
                    warn!(
                        "🚫 Refusing connection from {}: limit of {} reached",
                        addr, max_connections
                    );
                    drop(stream);
                    continue;
                };

                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    handle_connection(stream, addr, service, permit).await;
                });
            }
            _ = shutdown.recv() => {
                info!("Shutdown signal received; accept loop stopped");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    service: Arc<RoomSyncService>,
    _permit: OwnedSemaphorePermit,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (ws_sink, mut ws_receiver) = ws_stream.split();
    let (session, events) = service.connect();
    info!("Connection {} established from {}", session, addr);

    let writer = tokio::spawn(write_events(session, ws_sink, events));

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = route_client_message(text.as_str(), session, &service).await {
                    debug!("Request from {} rejected: {}", session, e);
                    service.send_to_session(session, ServerEvent::Error { reason: e.to_string() });
                }
            }
            Ok(Message::Close(_)) => {
                info!("Connection {} requested close", session);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(_) => {
                warn!("Received unsupported message type from {}", session);
            }
            Err(e) => {
                error!("WebSocket error for connection {}: {}", session, e);
                break;
            }
        }
    }

    if let Err(e) = service.disconnect(session).await {
        warn!("Disconnect cleanup for {} failed: {}", session, e);
    }
    // The hub dropped the session's sender, so the writer drains and exits.
    if let Err(e) = writer.await {
        warn!("Writer task for {} ended abnormally: {}", session, e);
    }
    info!("Connection {} from {} closed", session, addr);
}

async fn write_events(session: SessionId, mut sink: WsSink, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        let text = match serde_json::to_string(&*event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize event for {}: {}", session, e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            debug!("Send to {} failed: {}", session, e);
            break;
        }
    }
    let _ = sink.close().await;
}
