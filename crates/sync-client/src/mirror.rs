//! Confirmed-state mirror
//!
//! The client's copy of the authoritative participant set. Written only by
//! server messages and ledger polls, never by predicted state. A `full-sync`
//! replaces everything: deltas seen before it are superseded.

use agar_types::{Address, Amount, Participant, Position, ServerMessage};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Debug, Default)]
pub struct ConfirmedMirror {
    participants: HashMap<Address, Participant>,
}

impl ConfirmedMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one server message. Returns `true` if the participant set changed.
    pub fn apply(&mut self, msg: &ServerMessage) -> bool {
        match msg {
            ServerMessage::FullSync { participants } => {
                self.replace_all(participants.iter().cloned());
                true
            }
            ServerMessage::ParticipantJoined { address, value, x, y } => {
                self.upsert(address, *value, Position::new(*x, *y))
            }
            ServerMessage::ParticipantMoved { address, x, y, value } => {
                // An unknown mover is inserted: the move may be our first sight of it
                self.upsert(address, *value, Position::new(*x, *y))
            }
            ServerMessage::ParticipantRedeposited { address, new_value, .. } => {
                match self.participants.get_mut(address) {
                    Some(p) if *new_value > 0 => {
                        p.value = *new_value;
                        true
                    }
                    Some(_) => self.participants.remove(address).is_some(),
                    None => false,
                }
            }
            ServerMessage::ParticipantLeft { address, .. } => self.participants.remove(address).is_some(),
            ServerMessage::ParticipantsCollided {
                winner,
                loser,
                winner_new_value,
            } => {
                let removed = self.participants.remove(loser).is_some();
                let updated = match self.participants.get_mut(winner) {
                    Some(p) => {
                        p.value = *winner_new_value;
                        true
                    }
                    None => false,
                };
                removed || updated
            }
            _ => false,
        }
    }

    /// Wipe and rebuild from an authoritative list, dropping inactive records
    pub fn replace_all(&mut self, participants: impl IntoIterator<Item = Participant>) {
        self.participants = participants
            .into_iter()
            .filter(Participant::is_active)
            .map(|p| (p.address.clone(), p))
            .collect();
        debug!("mirror rebuilt with {} participants", self.participants.len());
    }

    fn upsert(&mut self, address: &Address, value: Amount, position: Position) -> bool {
        if value == 0 {
            return self.participants.remove(address).is_some();
        }
        self.participants
            .insert(address.clone(), Participant::new(address.clone(), value, position));
        true
    }

    pub fn get(&self, address: &Address) -> Option<&Participant> {
        self.participants.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.participants.contains_key(address)
    }

    /// Participants ordered by address
    pub fn snapshot(&self) -> Vec<Participant> {
        let mut all: Vec<Participant> = self.participants.values().cloned().collect();
        all.sort_by(|a, b| a.address.cmp(&b.address));
        all
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
