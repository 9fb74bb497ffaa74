//! Type-level errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid direction: {0}")]
    InvalidDirection(u8),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}
