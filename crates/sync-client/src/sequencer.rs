//! Nonce sequencer
//!
//! Local account sequence numbers so several actions can be submitted
//! before any confirms. The authoritative count only ever pulls the local
//! counter forward: a local counter ahead of the chain reflects submissions
//! still in flight.

use crate::error::ClientError;
use agar_types::Address;
use chain_relay::LedgerClient;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

pub struct NonceSequencer {
    address: Address,
    ledger: Arc<dyn LedgerClient>,
    next: Mutex<Option<u64>>,
}

impl NonceSequencer {
    pub fn new(address: Address, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            address,
            ledger,
            next: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Read the authoritative count and start from it
    pub async fn initialize(&self) -> Result<u64, ClientError> {
        let count = self.ledger.transaction_count(&self.address).await?;
        *self.next.lock() = Some(count);
        info!("Sequence for {} initialized at {}", self.address.short(), count);
        Ok(count)
    }

    pub fn is_initialized(&self) -> bool {
        self.next.lock().is_some()
    }

    /// Current value without consuming it
    pub fn peek(&self) -> Option<u64> {
        *self.next.lock()
    }

    /// Increment the local counter, returning the new value
    pub fn advance(&self) -> Option<u64> {
        let mut next = self.next.lock();
        let value = next.as_mut()?;
        *value += 1;
        Some(*value)
    }

    /// Peek then advance under one lock
    pub fn reserve(&self) -> Result<u64, ClientError> {
        let mut next = self.next.lock();
        let value = next.as_mut().ok_or(ClientError::SequenceUninitialized)?;
        let reserved = *value;
        *value += 1;
        Ok(reserved)
    }

    /// Compare with the authoritative count and snap forward if behind.
    /// Returns `true` if the local counter moved.
    pub async fn resync(&self) -> Result<bool, ClientError> {
        let count = self.ledger.transaction_count(&self.address).await?;
        Ok(self.snap_forward(count))
    }

    /// Never moves the counter backwards
    pub fn snap_forward(&self, authoritative: u64) -> bool {
        let mut next = self.next.lock();
        match *next {
            Some(local) if local >= authoritative => false,
            _ => {
                debug!("Sequence for {} snapped forward to {}", self.address.short(), authoritative);
                *next = Some(authoritative);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_relay::MockLedger;

    fn setup(count: u64) -> (MockLedger, NonceSequencer) {
        let ledger = MockLedger::new();
        let address = Address::from_bytes([9; 20]);
        ledger.set_nonce(&address, count);
        let sequencer = NonceSequencer::new(address, Arc::new(ledger.clone()));
        (ledger, sequencer)
    }

    #[tokio::test]
    async fn test_reserve_requires_initialization() {
        let (_ledger, sequencer) = setup(4);
        assert!(matches!(sequencer.reserve(), Err(ClientError::SequenceUninitialized)));
        assert_eq!(sequencer.advance(), None);

        assert_eq!(sequencer.initialize().await.unwrap(), 4);
        assert_eq!(sequencer.reserve().unwrap(), 4);
        assert_eq!(sequencer.reserve().unwrap(), 5);
        assert_eq!(sequencer.peek(), Some(6));
    }

    #[tokio::test]
    async fn test_resync_only_moves_forward() {
        let (ledger, sequencer) = setup(10);
        sequencer.initialize().await.unwrap();
        sequencer.advance();
        sequencer.advance();
        assert_eq!(sequencer.peek(), Some(12));

        // Chain behind local: two submissions still in flight
        ledger.set_nonce(sequencer.address(), 11);
        assert!(!sequencer.resync().await.unwrap());
        assert_eq!(sequencer.peek(), Some(12));

        // Chain ahead: confirmations we did not count
        ledger.set_nonce(sequencer.address(), 15);
        assert!(sequencer.resync().await.unwrap());
        assert_eq!(sequencer.peek(), Some(15));
    }
}
