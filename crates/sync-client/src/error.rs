//! Client errors

use agar_types::ActionKind;
use chain_relay::LedgerError;
use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Sequence number not initialized")]
    SequenceUninitialized,

    #[error("No local participant configured")]
    NoParticipant,

    #[error("No action submitter configured")]
    NoSubmitter,

    #[error("Submission of {kind} rejected: {reason}")]
    Rejected { kind: ActionKind, reason: String },

    #[error("Client stopped")]
    Stopped,
}
