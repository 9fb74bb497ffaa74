//! External ledger interface
//!
//! The relay only talks to the chain through `LedgerClient`, so the EVM
//! transport and the in-memory mock are interchangeable.

use crate::error::LedgerError;
use agar_types::{ActionId, Address, DomainEvent, GameConstants, Height, Participant, Receipt};
use async_trait::async_trait;
use futures::{future::try_join_all, stream::BoxStream};
use tracing::debug;

/// One item of the live chain subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    /// New block at the given height
    Block(Height),
    /// Decoded contract event
    Domain(DomainEvent),
}

/// Live chain subscription; dropping it detaches it from the ledger
pub type ChainEventStream = BoxStream<'static, Result<ChainEvent, LedgerError>>;

#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Current chain height
    async fn block_number(&self) -> Result<Height, LedgerError>;

    /// Fixed contract constants
    async fn game_constants(&self) -> Result<GameConstants, LedgerError>;

    /// Every address the contract lists as a participant
    async fn participant_addresses(&self) -> Result<Vec<Address>, LedgerError>;

    /// Record for one participant; `None` when its value is zero
    async fn participant(&self, address: &Address) -> Result<Option<Participant>, LedgerError>;

    /// Receipt lookup; `None` while the action is not yet included
    async fn receipt(&self, action_id: &ActionId) -> Result<Option<Receipt>, LedgerError>;

    /// Confirmed account sequence number
    async fn transaction_count(&self, address: &Address) -> Result<u64, LedgerError>;

    /// Subscribe to new blocks and contract events
    async fn subscribe(&self) -> Result<ChainEventStream, LedgerError>;
}

/// Fetch the authoritative participant list with one record read per
/// address in parallel. Zero-value records are dropped.
pub async fn fetch_participants(ledger: &dyn LedgerClient) -> Result<Vec<Participant>, LedgerError> {
    let addresses = ledger.participant_addresses().await?;
    let records = try_join_all(addresses.iter().map(|address| ledger.participant(address))).await?;
    let participants: Vec<Participant> = records
        .into_iter()
        .flatten()
        .filter(Participant::is_active)
        .collect();
    debug!("fetched {} of {} listed participants", participants.len(), addresses.len());
    Ok(participants)
}
