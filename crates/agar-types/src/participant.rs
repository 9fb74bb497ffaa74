//! Participant record and board geometry

use crate::{Address, Amount, TypesError};
use serde::{Deserialize, Serialize};

/// Position on the board (contract coordinate space)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u64,
    pub y: u64,
}

impl Position {
    pub const fn new(x: u64, y: u64) -> Self {
        Self { x, y }
    }

    /// The contract reports a dead participant by moving it to the origin.
    ///
    /// A live participant clamped into the top-left corner is
    /// indistinguishable from this; see DESIGN.md.
    pub fn is_death_sentinel(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

/// A participant as mirrored from the contract
///
/// Invariant: a participant with `value == 0` is absent and never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub address: Address,
    #[serde(with = "crate::amount")]
    pub value: Amount,
    pub x: u64,
    pub y: u64,
}

impl Participant {
    pub fn new(address: Address, value: Amount, position: Position) -> Self {
        Self {
            address,
            value,
            x: position.x,
            y: position.y,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    /// Whether this record may appear in a snapshot
    pub fn is_active(&self) -> bool {
        self.value > 0
    }
}

/// Movement direction (discriminants match the contract's enum)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Direction {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl TryFrom<u8> for Direction {
    type Error = TypesError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Direction::Up),
            1 => Ok(Direction::Down),
            2 => Ok(Direction::Left),
            3 => Ok(Direction::Right),
            other => Err(TypesError::InvalidDirection(other)),
        }
    }
}

impl From<Direction> for u8 {
    fn from(d: Direction) -> u8 {
        d as u8
    }
}
