//! In-memory ledger for tests
//!
//! Holds participants, receipts and sequence numbers in memory and lets a
//! test push blocks and events into every live subscription. Counts live
//! subscriptions so reconnect behavior can be asserted.

use crate::{
    error::LedgerError,
    ledger::{ChainEvent, ChainEventStream, LedgerClient},
};
use agar_types::{
    ActionId, Address, DomainEvent, GameConstants, Height, Participant, Receipt,
};
use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

type EventSender = mpsc::UnboundedSender<Result<ChainEvent, LedgerError>>;

#[derive(Default)]
struct MockState {
    height: Height,
    constants: GameConstants,
    participants: HashMap<Address, Participant>,
    receipts: HashMap<ActionId, Receipt>,
    nonces: HashMap<Address, u64>,
    failing_reads: u32,
    height_unavailable: bool,
    subscribe_delay: Option<Duration>,
    receipt_delay: Option<Duration>,
}

#[derive(Default)]
struct MockInner {
    state: Mutex<MockState>,
    subscribers: Mutex<Vec<EventSender>>,
    active: Arc<AtomicUsize>,
    subscribe_calls: AtomicUsize,
    participant_reads: AtomicUsize,
}

/// Scriptable `LedgerClient`
#[derive(Clone, Default)]
pub struct MockLedger {
    inner: Arc<MockInner>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_constants(&self, constants: GameConstants) {
        self.inner.state.lock().constants = constants;
    }

    pub fn set_height(&self, height: Height) {
        self.inner.state.lock().height = height;
    }

    pub fn set_participant(&self, participant: Participant) {
        self.inner
            .state
            .lock()
            .participants
            .insert(participant.address.clone(), participant);
    }

    pub fn remove_participant(&self, address: &Address) {
        self.inner.state.lock().participants.remove(address);
    }

    pub fn set_receipt(&self, receipt: Receipt) {
        self.inner
            .state
            .lock()
            .receipts
            .insert(receipt.action_id.clone(), receipt);
    }

    pub fn set_nonce(&self, address: &Address, nonce: u64) {
        self.inner.state.lock().nonces.insert(address.clone(), nonce);
    }

    /// Make the next `n` participant-list reads fail
    pub fn fail_next_resyncs(&self, n: u32) {
        self.inner.state.lock().failing_reads = n;
    }

    /// Make every height read fail until cleared
    pub fn set_height_unavailable(&self, unavailable: bool) {
        self.inner.state.lock().height_unavailable = unavailable;
    }

    /// Delay every `subscribe` reply. The subscription receives events
    /// from the moment it is requested.
    pub fn set_subscribe_delay(&self, delay: Duration) {
        self.inner.state.lock().subscribe_delay = Some(delay);
    }

    /// Delay every receipt lookup
    pub fn set_receipt_delay(&self, delay: Duration) {
        self.inner.state.lock().receipt_delay = Some(delay);
    }

    /// Push a block to all live subscriptions and record the height
    pub fn emit_block(&self, height: Height) {
        self.set_height(height);
        self.emit(ChainEvent::Block(height));
    }

    pub fn emit_event(&self, event: DomainEvent) {
        self.emit(ChainEvent::Domain(event));
    }

    pub fn emit(&self, event: ChainEvent) {
        self.inner
            .subscribers
            .lock()
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Fail every live subscription with a transport error
    pub fn disconnect_all(&self) {
        for tx in self.inner.subscribers.lock().drain(..) {
            let _ = tx.send(Err(LedgerError::Transport("mock disconnect".to_string())));
        }
    }

    /// Subscriptions whose stream has not been dropped yet
    pub fn active_subscriptions(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of per-participant record reads served
    pub fn participant_reads(&self) -> usize {
        self.inner.participant_reads.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<(), LedgerError> {
        let mut state = self.inner.state.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(LedgerError::Transport("mock read failure".to_string()));
        }
        Ok(())
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Result<ChainEvent, LedgerError>>,
    _guard: ActiveGuard,
}

impl Stream for MockStream {
    type Item = Result<ChainEvent, LedgerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn block_number(&self) -> Result<Height, LedgerError> {
        let state = self.inner.state.lock();
        if state.height_unavailable {
            return Err(LedgerError::Transport("mock height unavailable".to_string()));
        }
        Ok(state.height)
    }

    async fn game_constants(&self) -> Result<GameConstants, LedgerError> {
        Ok(self.inner.state.lock().constants.clone())
    }

    async fn participant_addresses(&self) -> Result<Vec<Address>, LedgerError> {
        self.take_failure()?;
        Ok(self.inner.state.lock().participants.keys().cloned().collect())
    }

    async fn participant(&self, address: &Address) -> Result<Option<Participant>, LedgerError> {
        self.inner.participant_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .inner
            .state
            .lock()
            .participants
            .get(address)
            .filter(|p| p.is_active())
            .cloned())
    }

    async fn receipt(&self, action_id: &ActionId) -> Result<Option<Receipt>, LedgerError> {
        let delay = self.inner.state.lock().receipt_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.inner.state.lock().receipts.get(action_id).cloned())
    }

    async fn transaction_count(&self, address: &Address) -> Result<u64, LedgerError> {
        Ok(self.inner.state.lock().nonces.get(address).copied().unwrap_or(0))
    }

    async fn subscribe(&self) -> Result<ChainEventStream, LedgerError> {
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let stream = MockStream {
            rx,
            _guard: ActiveGuard(self.inner.active.clone()),
        };

        let delay = self.inner.state.lock().subscribe_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Box::pin(stream))
    }
}
