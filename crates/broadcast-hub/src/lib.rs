//! Broadcast Hub - fan-out of authoritative state to observers
//!
//! - `BroadcastHub`: observer registry, initial state, rate-limited sync
//!   requests, action tracking requests
//! - `WebSocketServer`: push channel, one outbox per observer
//! - `HttpServer`: `GET /health`

pub mod error;
pub mod http_server;
pub mod hub;
pub mod ws_server;

pub use error::HubError;
pub use http_server::HttpServer;
pub use hub::{BroadcastHub, Observer, ObserverId};
pub use ws_server::WebSocketServer;

use std::time::Duration;

/// Hub configuration
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// WebSocket bind address
    pub ws_addr: String,
    /// HTTP bind address
    pub http_addr: String,
    /// Minimum interval between served sync requests per observer
    pub sync_window: Duration,
    /// Messages queued per observer before the socket writer applies backpressure
    pub outbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ws_addr: "127.0.0.1:3002".to_string(),
            http_addr: "127.0.0.1:3001".to_string(),
            sync_window: Duration::from_secs(2),
            outbox_capacity: 256,
        }
    }
}
