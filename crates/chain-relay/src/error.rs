//! Ledger and relay errors

use std::time::Duration;

/// Failure talking to the external ledger
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Subscription closed")]
    SubscriptionClosed,
}

/// Failure of a relay connect cycle or session
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Resync failed after {attempts} attempts: {last}")]
    ResyncExhausted { attempts: u32, last: LedgerError },
    #[error("No new block for {0:?}")]
    BlockTimeout(Duration),
    #[error("Health check failed: {0}")]
    HealthCheck(LedgerError),
    #[error("Connect already in progress")]
    AlreadyConnecting,
    #[error("Relay stopped")]
    Stopped,
}
