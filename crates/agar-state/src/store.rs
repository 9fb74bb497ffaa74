//! Authoritative participant store
//!
//! Reads take a short `parking_lot` read lock and never wait on the writer.
//! Every mutation goes through a `StoreWriter`, obtained from the async
//! writer gate, so a resync and an event-driven mutation can never
//! interleave. Callers publish the returned delta while still holding the
//! writer, which keeps fan-out order equal to mutation order.

use agar_types::{
    Address, Amount, DomainEvent, LeaveReason, Participant, Position, ServerMessage,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// Thread-safe authoritative participant map
#[derive(Clone, Default)]
pub struct ParticipantStore {
    participants: Arc<RwLock<HashMap<Address, Participant>>>,
    writer: Arc<Mutex<()>>,
}

impl ParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the single writer gate
    ///
    /// The gate is released when the returned writer is dropped, on every
    /// exit path.
    pub async fn write(&self) -> StoreWriter<'_> {
        let guard = self.writer.lock().await;
        StoreWriter {
            store: self,
            _guard: guard,
        }
    }

    /// Point-in-time export of every active participant
    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.read().values().cloned().collect()
    }

    pub fn get(&self, address: &Address) -> Option<Participant> {
        self.participants.read().get(address).cloned()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.participants.read().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.participants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.read().is_empty()
    }
}

/// Exclusive mutation handle for the participant store
///
/// Each operation returns the normalized delta to broadcast, or `None` when
/// the event had no effect.
pub struct StoreWriter<'a> {
    store: &'a ParticipantStore,
    _guard: MutexGuard<'a, ()>,
}

impl StoreWriter<'_> {
    /// Apply one contract event. `move_fee` is deducted from a mover's value.
    pub fn apply(&mut self, event: &DomainEvent, move_fee: Amount) -> Option<ServerMessage> {
        match event {
            DomainEvent::Joined {
                address,
                value,
                position,
            } => self.join(address.clone(), *value, *position),
            DomainEvent::Moved { address, position } => {
                self.apply_move(address, *position, move_fee)
            }
            DomainEvent::Left { address, .. } => self.leave(address),
            DomainEvent::Redeposited {
                address,
                added,
                new_value,
            } => self.redeposit(address, *added, *new_value),
            DomainEvent::Absorbed {
                winner,
                loser,
                winner_new_value,
                ..
            } => Some(self.absorb(winner, loser, *winner_new_value)),
        }
    }

    /// Insert or overwrite a participant
    pub fn join(&mut self, address: Address, value: Amount, position: Position) -> Option<ServerMessage> {
        let mut map = self.store.participants.write();
        if value == 0 {
            // A zero-value participant is absent
            return map.remove(&address).map(|_| ServerMessage::ParticipantLeft {
                address,
                reason: LeaveReason::Left,
            });
        }

        let participant = Participant::new(address.clone(), value, position);
        let delta = ServerMessage::joined(&participant);
        map.insert(address, participant);
        debug!("participant joined (total {})", map.len());
        Some(delta)
    }

    /// Move a known participant and charge the move fee.
    ///
    /// The origin is the contract's death marker. Unknown movers are ignored;
    /// the next resync picks them up.
    pub fn apply_move(&mut self, address: &Address, position: Position, move_fee: Amount) -> Option<ServerMessage> {
        let mut map = self.store.participants.write();

        if position.is_death_sentinel() {
            map.remove(address);
            debug!("participant {} died", address.short());
            return Some(ServerMessage::ParticipantLeft {
                address: address.clone(),
                reason: LeaveReason::Died,
            });
        }

        let Some(participant) = map.get_mut(address) else {
            trace!("move for unknown participant {}", address.short());
            return None;
        };

        let new_value = participant.value.saturating_sub(move_fee);
        if new_value == 0 {
            map.remove(address);
            return Some(ServerMessage::ParticipantLeft {
                address: address.clone(),
                reason: LeaveReason::Died,
            });
        }

        participant.value = new_value;
        participant.x = position.x;
        participant.y = position.y;
        Some(ServerMessage::ParticipantMoved {
            address: address.clone(),
            x: position.x,
            y: position.y,
            value: new_value,
        })
    }

    pub fn leave(&mut self, address: &Address) -> Option<ServerMessage> {
        self.store.participants.write().remove(address);
        Some(ServerMessage::ParticipantLeft {
            address: address.clone(),
            reason: LeaveReason::Left,
        })
    }

    /// Overwrite the value of an existing participant; no-op if absent
    pub fn redeposit(&mut self, address: &Address, added: Amount, new_value: Amount) -> Option<ServerMessage> {
        let mut map = self.store.participants.write();
        let participant = map.get_mut(address)?;
        if new_value == 0 {
            map.remove(address);
            return Some(ServerMessage::ParticipantLeft {
                address: address.clone(),
                reason: LeaveReason::Left,
            });
        }
        participant.value = new_value;
        Some(ServerMessage::ParticipantRedeposited {
            address: address.clone(),
            added,
            new_value,
        })
    }

    /// Winner takes its new value, loser is removed
    pub fn absorb(&mut self, winner: &Address, loser: &Address, winner_new_value: Amount) -> ServerMessage {
        let mut map = self.store.participants.write();
        map.remove(loser);
        if winner_new_value == 0 {
            map.remove(winner);
        } else if let Some(w) = map.get_mut(winner) {
            w.value = winner_new_value;
        }
        ServerMessage::ParticipantsCollided {
            winner: winner.clone(),
            loser: loser.clone(),
            winner_new_value,
        }
    }

    /// Replace the whole map in one step and return the resulting full sync.
    ///
    /// Zero-value records are dropped; a repeated address keeps its last record.
    pub fn replace_all(&mut self, participants: Vec<Participant>) -> ServerMessage {
        let fresh: HashMap<Address, Participant> = participants
            .into_iter()
            .filter(Participant::is_active)
            .map(|p| (p.address.clone(), p))
            .collect();

        let snapshot: Vec<Participant> = fresh.values().cloned().collect();
        *self.store.participants.write() = fresh;
        debug!("store replaced with {} participants", snapshot.len());
        ServerMessage::FullSync {
            participants: snapshot,
        }
    }

    pub fn snapshot(&self) -> Vec<Participant> {
        self.store.snapshot()
    }
}
