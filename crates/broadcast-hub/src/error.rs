//! Hub errors

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Observer outbox closed")]
    OutboxClosed,
}
