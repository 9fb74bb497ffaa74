//! Push-channel wire protocol
//!
//! JSON text frames of the form `{"type": "<kebab-case>", ...camelCase fields}`.
//!
//! Server → client:
//! - `connection-status`, `block-update`, `full-sync`
//! - per-kind deltas: `participant-joined`, `participant-moved`,
//!   `participant-left`, `participant-redeposited`, `participants-collided`
//! - action lifecycle: `action-confirmed`, `action-expired`, `action-failed`
//! - `pong`
//!
//! Client → server: `request-sync`, `track-action`, `ping`

use crate::{
    ActionId, ActionKind, Address, Amount, Direction, Height, Participant, PendingAction,
    TypesError,
};
use serde::{Deserialize, Serialize};

/// Why a participant disappeared
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveReason {
    /// Withdrew from the game
    Left,
    /// Reported dead by the contract (moved to the origin sentinel)
    Died,
}

/// Message pushed from the broadcast hub to observers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    ConnectionStatus {
        connected: bool,
    },
    BlockUpdate {
        height: Height,
    },
    FullSync {
        participants: Vec<Participant>,
    },
    ParticipantJoined {
        address: Address,
        #[serde(with = "crate::amount")]
        value: Amount,
        x: u64,
        y: u64,
    },
    ParticipantMoved {
        address: Address,
        x: u64,
        y: u64,
        #[serde(with = "crate::amount")]
        value: Amount,
    },
    ParticipantLeft {
        address: Address,
        reason: LeaveReason,
    },
    ParticipantRedeposited {
        address: Address,
        #[serde(with = "crate::amount")]
        added: Amount,
        #[serde(with = "crate::amount")]
        new_value: Amount,
    },
    ParticipantsCollided {
        winner: Address,
        loser: Address,
        #[serde(with = "crate::amount")]
        winner_new_value: Amount,
    },
    ActionConfirmed {
        action_id: ActionId,
        kind: ActionKind,
        height: Height,
    },
    ActionExpired {
        action_id: ActionId,
        kind: ActionKind,
        deadline: Height,
    },
    ActionFailed {
        action_id: ActionId,
        kind: ActionKind,
        reason: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Result<Self, TypesError> {
        serde_json::from_str(text).map_err(|e| TypesError::MalformedMessage(e.to_string()))
    }

    pub fn joined(p: &Participant) -> Self {
        ServerMessage::ParticipantJoined {
            address: p.address.clone(),
            value: p.value,
            x: p.x,
            y: p.y,
        }
    }
}

/// Message sent by an observer to the hub
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    RequestSync,
    TrackAction {
        action_id: ActionId,
        deadline: Height,
        kind: ActionKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant: Option<Address>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    Ping,
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Result<Self, TypesError> {
        serde_json::from_str(text).map_err(|e| TypesError::MalformedMessage(e.to_string()))
    }

    /// Build a `track-action` request for a pending action
    pub fn track(action: &PendingAction) -> Self {
        ClientMessage::TrackAction {
            action_id: action.action_id.clone(),
            deadline: action.deadline,
            kind: action.kind,
            participant: action.participant.clone(),
            direction: action.direction,
            sequence: action.sequence,
        }
    }

    /// Convert a `track-action` request into a pending record
    pub fn into_pending(self) -> Option<PendingAction> {
        match self {
            ClientMessage::TrackAction {
                action_id,
                deadline,
                kind,
                participant,
                direction,
                sequence,
            } => {
                let mut action = PendingAction::new(action_id, kind, deadline);
                action.participant = participant;
                action.direction = direction;
                action.sequence = sequence;
                Some(action)
            }
            _ => None,
        }
    }
}

/// Health endpoint payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub connected: bool,
    pub height: Height,
    pub participant_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    #[test]
    fn test_server_message_shape() {
        let msg = ServerMessage::ParticipantsCollided {
            winner: addr(1),
            loser: addr(2),
            winner_new_value: 80,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "participants-collided");
        assert_eq!(value["winnerNewValue"], "80");
        assert_eq!(value["loser"], addr(2).as_str());
    }

    #[test]
    fn test_unit_variants() {
        assert_eq!(ClientMessage::RequestSync.to_json(), r#"{"type":"request-sync"}"#);
        assert_eq!(ClientMessage::from_json(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
    }

    #[test]
    fn test_track_action_from_browser_payload() {
        let raw = r#"{"type":"track-action","actionId":"0xABC","deadline":1020,"kind":"move","direction":"up","sequence":7}"#;
        let pending = ClientMessage::from_json(raw).unwrap().into_pending().unwrap();
        assert_eq!(pending.action_id, ActionId::new("0xabc"));
        assert_eq!(pending.deadline, 1020);
        assert_eq!(pending.direction, Some(Direction::Up));
        assert_eq!(pending.sequence, Some(7));
        assert!(pending.participant.is_none());
    }

    #[test]
    fn test_malformed_is_error() {
        assert!(ServerMessage::from_json(r#"{"type":"nope"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }
}
