//! Shared types for agar state synchronization
//!
//! This crate contains the types shared by the server relay, the broadcast hub
//! and the client reconciler:
//! - Participant records keyed by canonical (lowercase) address
//! - Pending action records and receipts
//! - Normalized domain events emitted by the game contract
//! - The push-channel wire protocol
//! - Movement rules mirroring the contract (velocity and clamped steps)

pub mod action;
pub mod address;
pub mod amount;
pub mod error;
pub mod event;
pub mod participant;
pub mod protocol;
pub mod rules;

pub use action::{ActionId, ActionKind, ActionOutcome, OutcomeStatus, PendingAction, Receipt, ReceiptStatus};
pub use address::Address;
pub use error::TypesError;
pub use event::{DomainEvent, GameConstants};
pub use participant::{Direction, Participant, Position};
pub use protocol::{ClientMessage, HealthStatus, LeaveReason, ServerMessage};

/// Block height (monotonically increasing chain ordinal)
pub type Height = u64;

/// Deposited value in the smallest unit of the chain's native token
pub type Amount = u128;

/// Deadline offset for move actions (matches frontend constants)
pub const MOVE_DEADLINE_BLOCKS: u64 = 20;

/// Deadline offset for join / leave / redeposit actions
pub const NON_URGENT_DEADLINE_BLOCKS: u64 = 100;
