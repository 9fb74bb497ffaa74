//! Pending actions, receipts and terminal outcomes

use crate::{Address, Direction, Height};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix marking a locally generated placeholder identifier
const PROVISIONAL_PREFIX: &str = "temp-";

/// Identifier of a submitted action (a transaction hash once known)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Authoritative identifier (hashes are compared lowercase)
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    /// Local placeholder used until submission returns the real identifier
    pub fn provisional(local_seq: u64, direction: Option<Direction>) -> Self {
        let ts = Utc::now().timestamp_millis();
        match direction {
            Some(d) => Self(format!("{}{}-{}-{}", PROVISIONAL_PREFIX, ts, local_seq, d as u8)),
            None => Self(format!("{}{}-{}", PROVISIONAL_PREFIX, ts, local_seq)),
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of game action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Join,
    Move,
    Leave,
    Redeposit,
}

impl ActionKind {
    /// Blocks added to the current height to form the deadline
    pub fn deadline_offset(&self) -> u64 {
        match self {
            ActionKind::Move => crate::MOVE_DEADLINE_BLOCKS,
            _ => crate::NON_URGENT_DEADLINE_BLOCKS,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Join => "join",
            ActionKind::Move => "move",
            ActionKind::Leave => "leave",
            ActionKind::Redeposit => "redeposit",
        };
        f.write_str(s)
    }
}

/// An action submitted but not yet confirmed, expired or failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: ActionId,
    pub kind: ActionKind,
    /// Last height at which the action is still valid
    pub deadline: Height,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Address>,
    /// Present only for moves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Account sequence number; present only for moves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl PendingAction {
    pub fn new(action_id: ActionId, kind: ActionKind, deadline: Height) -> Self {
        Self {
            action_id,
            kind,
            deadline,
            submitted_at: Utc::now(),
            participant: None,
            direction: None,
            sequence: None,
        }
    }

    pub fn with_participant(mut self, participant: Address) -> Self {
        self.participant = Some(participant);
        self
    }

    pub fn with_move(mut self, direction: Direction, sequence: u64) -> Self {
        self.direction = Some(direction);
        self.sequence = Some(sequence);
        self
    }

    /// Strict deadline check: the action is still valid at its deadline block.
    pub fn is_expired_at(&self, height: Height) -> bool {
        height > self.deadline
    }

    /// Age in milliseconds relative to `now`
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.submitted_at).num_milliseconds()
    }
}

/// Receipt execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Result of a receipt lookup that found the action on chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub action_id: ActionId,
    pub status: ReceiptStatus,
    pub block_number: Height,
}

/// Terminal status of a tracked action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OutcomeStatus {
    Confirmed { height: Height },
    Expired { deadline: Height },
    Failed { reason: String },
}

/// User-facing terminal notification for one action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: ActionId,
    pub kind: ActionKind,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}
