//! Client-side state synchronization
//!
//! Keeps two namespaces apart and merges them only at projection time:
//! - `ConfirmedMirror`: participants as delivered by the hub (or polled from
//!   the ledger while the push channel is down)
//! - `OptimisticProjector`: the local participant's queued moves
//!
//! Around them:
//! - `LocalActionTracker`: pending actions of the local participant
//! - `NonceSequencer`: local account sequence numbers
//! - `TransportReconciler`: connecting / live / degraded / reconnect states
//! - `ClientRuntime`: the async driver wiring all of the above

pub mod error;
pub mod mirror;
pub mod projector;
pub mod runtime;
pub mod sequencer;
pub mod session;
pub mod tracker;
pub mod transport;

pub use error::ClientError;
pub use mirror::ConfirmedMirror;
pub use projector::{OptimisticProjector, QueuedMove};
pub use runtime::{ClientRuntime, ClientUpdate};
pub use sequencer::NonceSequencer;
pub use session::{ActionRequest, ActionSubmitter, Applied, ClientSession};
pub use tracker::LocalActionTracker;
pub use transport::{TransportCommand, TransportEvent, TransportReconciler, TransportState};

use std::time::Duration;

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Push channel URL
    pub ws_url: String,
    /// Participant list poll period while the push channel is down
    pub poll_interval: Duration,
    /// Liveness ping period while live
    pub ping_interval: Duration,
    /// Backoff before a reconnect attempt
    pub reconnect_delay: Duration,
    /// Block height poll period while the push channel is down
    pub block_poll_interval: Duration,
    /// Period of the receipt fallback check
    pub receipt_check_interval: Duration,
    /// Minimum age of an action before its receipt is checked directly
    pub receipt_check_age: Duration,
    /// Period of the sequence number resync
    pub nonce_resync_interval: Duration,
    /// Capacity of the update channel handed to renderers
    pub update_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:3002".to_string(),
            poll_interval: Duration::from_millis(500),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            block_poll_interval: Duration::from_secs(2),
            receipt_check_interval: Duration::from_secs(10),
            receipt_check_age: Duration::from_secs(30),
            nonce_resync_interval: Duration::from_secs(30),
            update_capacity: 256,
        }
    }
}
