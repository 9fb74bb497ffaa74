//! Observer registry and request handling
//!
//! Deltas reach observers through the relay's broadcast channel, which
//! preserves mutation order. The hub only adds per-observer concerns:
//! initial state, sync request throttling and action tracking.

use crate::HubConfig;
use agar_types::{ClientMessage, HealthStatus, ServerMessage};
use chain_relay::ChainRelay;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Observer ID
pub type ObserverId = u64;

/// A newly registered observer
pub struct Observer {
    pub id: ObserverId,
    /// Messages to send before any update
    pub initial: Vec<ServerMessage>,
    /// Live updates, subscribed before `initial` was built
    pub updates: broadcast::Receiver<ServerMessage>,
}

/// Broadcast Hub
pub struct BroadcastHub {
    relay: ChainRelay,
    config: HubConfig,
    /// Last served sync request per observer
    last_sync: DashMap<ObserverId, Instant>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new(relay: ChainRelay, config: HubConfig) -> Self {
        Self {
            relay,
            config,
            last_sync: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register an observer.
    ///
    /// The update receiver is created before the initial snapshot is read,
    /// so nothing can fall between the two. Deltas carry absolute values, so
    /// one that is also reflected in the snapshot is harmless.
    pub fn register_observer(&self) -> Observer {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let updates = self.relay.subscribe();
        let initial = self.initial_messages();
        info!("Observer {} registered ({} initial messages)", id, initial.len());
        Observer {
            id,
            initial,
            updates,
        }
    }

    /// Connectivity, height and, if any participants exist, a full snapshot
    pub fn initial_messages(&self) -> Vec<ServerMessage> {
        let mut messages = vec![
            ServerMessage::ConnectionStatus {
                connected: self.relay.is_connected(),
            },
            ServerMessage::BlockUpdate {
                height: self.relay.height(),
            },
        ];
        if !self.relay.store().is_empty() {
            messages.push(self.snapshot_message());
        }
        messages
    }

    pub fn snapshot_message(&self) -> ServerMessage {
        ServerMessage::FullSync {
            participants: self.relay.store().snapshot(),
        }
    }

    /// Handle one observer message and return the direct replies
    pub fn handle_client_message(&self, id: ObserverId, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::RequestSync => {
                if !self.allow_sync(id) {
                    debug!("Observer {} sync request throttled", id);
                    return Vec::new();
                }
                if !self.relay.store().is_empty() {
                    return vec![self.snapshot_message()];
                }
                // Empty store: resync and let the resulting full sync reach everyone
                let relay = self.relay.clone();
                tokio::spawn(async move {
                    if let Err(e) = relay.resync_once().await {
                        warn!("On-demand resync failed: {}", e);
                    }
                });
                Vec::new()
            }
            msg @ ClientMessage::TrackAction { .. } => {
                if let Some(action) = msg.into_pending() {
                    let action_id = action.action_id.clone();
                    if !self.relay.track(action) {
                        debug!("Observer {} re-announced {}", id, action_id);
                    }
                }
                Vec::new()
            }
            ClientMessage::Ping => vec![ServerMessage::Pong],
        }
    }

    /// Release per-observer bookkeeping
    pub fn unregister_observer(&self, id: ObserverId) {
        self.last_sync.remove(&id);
        info!("Observer {} unregistered", id);
    }

    pub fn health(&self) -> HealthStatus {
        self.relay.health()
    }

    pub fn relay(&self) -> &ChainRelay {
        &self.relay
    }

    /// Soft throttle: a request inside the window is dropped and does not
    /// extend it
    fn allow_sync(&self, id: ObserverId) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_sync.get(&id) {
            if now.duration_since(*last) < self.config.sync_window {
                return false;
            }
        }
        self.last_sync.insert(id, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agar_state::{ActionTracker, BlockCursor, ParticipantStore};
    use agar_types::{ActionId, ActionKind, Address, Participant, PendingAction, Position};
    use chain_relay::{MockLedger, RelayConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn hub_with(ledger: &MockLedger, window: Duration) -> BroadcastHub {
        let relay = ChainRelay::new(
            RelayConfig::default(),
            Arc::new(ledger.clone()),
            ParticipantStore::new(),
            ActionTracker::new(),
            BlockCursor::new(),
        );
        BroadcastHub::new(
            relay,
            HubConfig {
                sync_window: window,
                ..HubConfig::default()
            },
        )
    }

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    #[tokio::test]
    async fn test_initial_messages() {
        let ledger = MockLedger::new();
        ledger.set_height(77);
        let hub = hub_with(&ledger, Duration::from_secs(2));

        let observer = hub.register_observer();
        assert_eq!(observer.initial.len(), 2);
        assert_eq!(observer.initial[0], ServerMessage::ConnectionStatus { connected: false });

        ledger.set_participant(Participant::new(addr(1), 10, Position::new(1, 1)));
        hub.relay().connect().await.unwrap();

        let observer = hub.register_observer();
        assert_eq!(
            observer.initial[..2],
            [
                ServerMessage::ConnectionStatus { connected: true },
                ServerMessage::BlockUpdate { height: 77 }
            ]
        );
        assert!(matches!(&observer.initial[2], ServerMessage::FullSync { participants } if participants.len() == 1));
    }

    #[tokio::test]
    async fn test_rate_limiting() {
        let ledger = MockLedger::new();
        ledger.set_participant(Participant::new(addr(1), 10, Position::new(1, 1)));
        let hub = hub_with(&ledger, Duration::from_millis(100));
        hub.relay().connect().await.unwrap();
        let observer = hub.register_observer();

        assert_eq!(hub.handle_client_message(observer.id, ClientMessage::RequestSync).len(), 1);
        assert!(hub.handle_client_message(observer.id, ClientMessage::RequestSync).is_empty());

        // Another observer has its own window
        assert_eq!(hub.handle_client_message(observer.id + 1, ClientMessage::RequestSync).len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(hub.handle_client_message(observer.id, ClientMessage::RequestSync).len(), 1);
    }

    #[tokio::test]
    async fn test_sync_on_empty_store_triggers_resync() {
        let ledger = MockLedger::new();
        let hub = hub_with(&ledger, Duration::from_secs(2));
        let mut observer = hub.register_observer();

        ledger.set_participant(Participant::new(addr(2), 10, Position::new(1, 1)));
        assert!(hub.handle_client_message(observer.id, ClientMessage::RequestSync).is_empty());

        let msg = tokio::time::timeout(Duration::from_secs(2), observer.updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(msg, ServerMessage::FullSync { participants } if participants.len() == 1));
        assert_eq!(hub.relay().store().len(), 1);
    }

    #[tokio::test]
    async fn test_track_and_ping() {
        let ledger = MockLedger::new();
        let hub = hub_with(&ledger, Duration::from_secs(2));
        let observer = hub.register_observer();

        let action = PendingAction::new(ActionId::new("0xabc"), ActionKind::Move, 50);
        assert!(hub
            .handle_client_message(observer.id, ClientMessage::track(&action))
            .is_empty());
        assert!(hub.relay().tracker().contains(&ActionId::new("0xabc")));

        assert_eq!(hub.handle_client_message(observer.id, ClientMessage::Ping), vec![ServerMessage::Pong]);
    }

    #[tokio::test]
    async fn test_unregister_releases_window() {
        let ledger = MockLedger::new();
        ledger.set_participant(Participant::new(addr(1), 10, Position::new(1, 1)));
        let hub = hub_with(&ledger, Duration::from_secs(60));
        hub.relay().connect().await.unwrap();

        let id = hub.register_observer().id;
        assert_eq!(hub.handle_client_message(id, ClientMessage::RequestSync).len(), 1);
        hub.unregister_observer(id);
        assert_eq!(hub.handle_client_message(id, ClientMessage::RequestSync).len(), 1);
    }
}
