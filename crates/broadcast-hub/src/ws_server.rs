//! WebSocket Server
//!
//! Push channel for observers. Each connection gets:
//! - an outbox drained by a writer task into the socket
//! - a forwarder from the relay broadcast into the outbox
//! - a reader loop answering `request-sync`, `track-action` and `ping`

use crate::{error::HubError, hub::BroadcastHub};
use agar_types::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// WebSocket Server
pub struct WebSocketServer {
    hub: Arc<BroadcastHub>,
}

impl WebSocketServer {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }

    /// Bind and run the server
    pub async fn run(self, addr: &str) -> Result<(), HubError> {
        let listener = TcpListener::bind(addr).await?;
        info!("WebSocket server listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), HubError> {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    continue;
                }
            };
            let hub = self.hub.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, hub).await {
                    warn!("WebSocket connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Handle a single observer connection
async fn handle_connection(stream: TcpStream, hub: Arc<BroadcastHub>) -> Result<(), HubError> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let observer = hub.register_observer();
    let observer_id = observer.id;
    let (outbox, mut outbox_rx) = mpsc::channel::<ServerMessage>(hub.config().outbox_capacity.max(1));

    for msg in observer.initial {
        outbox.send(msg).await.map_err(|_| HubError::OutboxClosed)?;
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if ws_sender.send(Message::Text(msg.to_json())).await.is_err() {
                break;
            }
        }
    });

    let forward_task = tokio::spawn(forward_updates(hub.clone(), observer.updates, outbox.clone()));

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Observer {} socket error: {}", observer_id, e);
                break;
            }
        };

        let request = match ClientMessage::from_json(&text) {
            Ok(req) => req,
            Err(e) => {
                warn!("Observer {} sent malformed message: {}", observer_id, e);
                continue;
            }
        };

        for reply in hub.handle_client_message(observer_id, request) {
            if outbox.send(reply).await.is_err() {
                break;
            }
        }
    }

    // Cleanup
    forward_task.abort();
    send_task.abort();
    hub.unregister_observer(observer_id);
    Ok(())
}

/// Relay broadcast → observer outbox. A lagging observer gets a fresh snapshot.
async fn forward_updates(
    hub: Arc<BroadcastHub>,
    mut updates: broadcast::Receiver<ServerMessage>,
    outbox: mpsc::Sender<ServerMessage>,
) {
    loop {
        let msg = match updates.recv().await {
            Ok(msg) => msg,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Observer lagged {} messages, resending snapshot", n);
                hub.snapshot_message()
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if outbox.send(msg).await.is_err() {
            debug!("Observer outbox closed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HubConfig;
    use agar_state::{ActionTracker, BlockCursor, ParticipantStore};
    use agar_types::{Address, DomainEvent, Participant, Position};
    use chain_relay::{ChainRelay, MockLedger, RelayConfig};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn start_server(ledger: &MockLedger) -> (Arc<BroadcastHub>, String) {
        let relay = ChainRelay::new(
            RelayConfig::default(),
            Arc::new(ledger.clone()),
            ParticipantStore::new(),
            ActionTracker::new(),
            BlockCursor::new(),
        );
        relay.connect().await.unwrap();
        let hub = Arc::new(BroadcastHub::new(relay, HubConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(WebSocketServer::new(hub.clone()).serve(listener));
        (hub, url)
    }

    async fn next_message<S>(rx: &mut S) -> ServerMessage
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.next())
                .await
                .expect("timed out")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = frame {
                return ServerMessage::from_json(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_observer_receives_initial_state_and_deltas() {
        let ledger = MockLedger::new();
        ledger.set_height(12);
        let a = Address::from_bytes([1; 20]);
        ledger.set_participant(Participant::new(a.clone(), 40, Position::new(3, 4)));
        let (_hub, url) = start_server(&ledger).await;

        let (ws, _) = connect_async(&url).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        assert_eq!(next_message(&mut rx).await, ServerMessage::ConnectionStatus { connected: true });
        assert_eq!(next_message(&mut rx).await, ServerMessage::BlockUpdate { height: 12 });
        assert!(matches!(next_message(&mut rx).await, ServerMessage::FullSync { .. }));

        ledger.emit_event(DomainEvent::Left { address: a.clone(), value: 40 });
        assert!(matches!(
            next_message(&mut rx).await,
            ServerMessage::ParticipantLeft { address, .. } if address == a
        ));

        // Malformed input is dropped, the connection stays usable
        tx.send(Message::Text("{not json".to_string())).await.unwrap();
        tx.send(Message::Text(ClientMessage::Ping.to_json())).await.unwrap();
        assert_eq!(next_message(&mut rx).await, ServerMessage::Pong);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_observer() {
        let ledger = MockLedger::new();
        ledger.set_participant(Participant::new(Address::from_bytes([2; 20]), 5, Position::new(1, 1)));
        let (hub, url) = start_server(&ledger).await;

        let (ws, _) = connect_async(&url).await.unwrap();
        let (mut tx, mut rx) = ws.split();
        tx.send(Message::Text(ClientMessage::RequestSync.to_json())).await.unwrap();
        // Initial snapshot, then the reply to the request
        let mut snapshots = 0;
        while snapshots < 2 {
            if matches!(next_message(&mut rx).await, ServerMessage::FullSync { .. }) {
                snapshots += 1;
            }
        }
        assert!(hub.handle_client_message(1, ClientMessage::RequestSync).is_empty());
        tx.send(Message::Close(None)).await.unwrap();
        drop(tx);
        drop(rx);

        // The observer's throttle entry is gone once the server notices the close
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !hub.handle_client_message(1, ClientMessage::RequestSync).is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }
}
