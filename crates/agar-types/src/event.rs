//! Normalized domain events and contract constants

use crate::{Address, Amount, Position};
use serde::{Deserialize, Serialize};

/// One contract event, normalized (addresses canonicalized, fields typed)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DomainEvent {
    /// `Enter(player, monAmount, x, y)`
    Joined {
        address: Address,
        #[serde(with = "crate::amount")]
        value: Amount,
        position: Position,
    },
    /// `Move(player, x, y)`; (0,0) reports a death
    Moved { address: Address, position: Position },
    /// `Leave(player, monAmount)`
    Left {
        address: Address,
        #[serde(with = "crate::amount")]
        value: Amount,
    },
    /// `Redeposit(player, addedAmount, newMonAmount)`
    Redeposited {
        address: Address,
        #[serde(with = "crate::amount")]
        added: Amount,
        #[serde(with = "crate::amount")]
        new_value: Amount,
    },
    /// `Collision(winner, loser, winnerNewAmount, loserAmount)`
    Absorbed {
        winner: Address,
        loser: Address,
        #[serde(with = "crate::amount")]
        winner_new_value: Amount,
        #[serde(with = "crate::amount")]
        loser_value: Amount,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::Joined { .. } => "Enter",
            DomainEvent::Moved { .. } => "Move",
            DomainEvent::Left { .. } => "Leave",
            DomainEvent::Redeposited { .. } => "Redeposit",
            DomainEvent::Absorbed { .. } => "Collision",
        }
    }
}

/// Fixed game constants read once from the contract
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConstants {
    #[serde(with = "crate::amount")]
    pub move_fee: Amount,
    #[serde(with = "crate::amount")]
    pub min_value: Amount,
    #[serde(with = "crate::amount")]
    pub max_value: Amount,
    pub board_width: u64,
    pub board_height: u64,
    pub velocity_min: u64,
    pub velocity_max: u64,
}

impl Default for GameConstants {
    /// Frontend fallbacks used before the contract has been read
    fn default() -> Self {
        Self {
            move_fee: 0,
            min_value: 1,
            max_value: 1000,
            board_width: 20_000,
            board_height: 20_000,
            velocity_min: 100,
            velocity_max: 500,
        }
    }
}
