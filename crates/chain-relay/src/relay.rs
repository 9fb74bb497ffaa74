//! Relay lifecycle: connect, pump, monitor, tear down, reconnect

use crate::{
    error::{LedgerError, RelayError},
    ledger::{fetch_participants, ChainEvent, ChainEventStream, LedgerClient},
    RelayConfig,
};
use agar_state::{ActionTracker, BlockCursor, ParticipantStore};
use agar_types::{
    Amount, DomainEvent, GameConstants, HealthStatus, Height, PendingAction, ReceiptStatus,
    ServerMessage,
};
use futures::{future::join_all, FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tasks owned by one live subscription; aborted together on drop
struct Session {
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
    /// In-flight receipt lookups started by this session's blocks
    probes: Vec<JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in self.tasks.iter().chain(&self.probes) {
            task.abort();
        }
    }
}

/// Clears the single-flight connect flag on every exit path
struct ConnectGuard<'a>(&'a AtomicBool);

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct RelayShared {
    config: RelayConfig,
    ledger: Arc<dyn LedgerClient>,
    store: ParticipantStore,
    tracker: ActionTracker,
    cursor: BlockCursor,
    events: broadcast::Sender<ServerMessage>,
    connected: AtomicBool,
    connecting: AtomicBool,
    stopped: AtomicBool,
    /// Incremented for every session; stale session tasks compare against it
    generation: AtomicU64,
    constants: RwLock<Option<GameConstants>>,
    session: Mutex<Option<Session>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

/// Chain Event Relay
///
/// Owns the connection to the ledger and is the only writer of the
/// participant store and the server-side action tracker.
#[derive(Clone)]
pub struct ChainRelay {
    shared: Arc<RelayShared>,
}

impl ChainRelay {
    pub fn new(
        config: RelayConfig,
        ledger: Arc<dyn LedgerClient>,
        store: ParticipantStore,
        tracker: ActionTracker,
        cursor: BlockCursor,
    ) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            shared: Arc::new(RelayShared {
                config,
                ledger,
                store,
                tracker,
                cursor,
                events,
                connected: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                constants: RwLock::new(None),
                session: Mutex::new(None),
                reconnect: Mutex::new(None),
            }),
        }
    }

    /// Connect in the background; a failed first attempt goes through the
    /// normal reconnect path
    pub fn start(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            if let Err(e) = shared.connect().await {
                error!("Initial ledger connect failed: {}", e);
                shared.publish(ServerMessage::ConnectionStatus { connected: false });
                shared.schedule_reconnect();
            }
        });
    }

    /// One connect cycle. At most one runs at a time.
    pub async fn connect(&self) -> Result<(), RelayError> {
        self.shared.connect().await
    }

    /// Permanent shutdown: cancels the reconnect timer and the session
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.shared.reconnect.lock().take() {
            handle.abort();
        }
        self.shared.teardown();
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            self.shared.publish(ServerMessage::ConnectionStatus { connected: false });
        }
        info!("Relay stopped");
    }

    /// Receiver for every message the relay emits, in emission order
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.shared.events.subscribe()
    }

    /// Register an action announced by an observer
    pub fn track(&self, action: PendingAction) -> bool {
        self.shared.tracker.track(action)
    }

    /// Single resync attempt, used for observer sync requests on an empty store
    pub async fn resync_once(&self) -> Result<usize, RelayError> {
        Ok(self.shared.resync().await?)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn height(&self) -> Height {
        self.shared.cursor.get()
    }

    /// Cached contract constants, or defaults before the first connect
    pub fn constants(&self) -> GameConstants {
        self.shared.constants.read().clone().unwrap_or_default()
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            connected: self.is_connected(),
            height: self.height(),
            participant_count: self.shared.store.len(),
        }
    }

    pub fn store(&self) -> &ParticipantStore {
        &self.shared.store
    }

    pub fn tracker(&self) -> &ActionTracker {
        &self.shared.tracker
    }

    pub fn cursor(&self) -> &BlockCursor {
        &self.shared.cursor
    }

    /// Apply a block as if it came from the subscription
    pub async fn handle_block(&self, height: Height) {
        self.shared.handle_block(height).await
    }

    /// Apply a contract event as if it came from the subscription
    pub async fn handle_event(&self, event: DomainEvent) {
        self.shared.handle_event(event).await
    }
}

impl RelayShared {
    fn publish(&self, msg: ServerMessage) {
        // No receivers is fine
        let _ = self.events.send(msg);
    }

    fn move_fee(&self) -> Amount {
        self.constants.read().as_ref().map(|c| c.move_fee).unwrap_or(0)
    }

    async fn connect(self: &Arc<Self>) -> Result<(), RelayError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(RelayError::Stopped);
        }
        if self.connecting.swap(true, Ordering::AcqRel) {
            warn!("Connect already in progress, skipping");
            return Err(RelayError::AlreadyConnecting);
        }
        let _guard = ConnectGuard(&self.connecting);

        // Drop any stale session before building a new one
        self.teardown();

        if self.constants.read().is_none() {
            let constants = self.ledger.game_constants().await?;
            info!(
                "Contract constants loaded: move_fee={} board={}x{}",
                constants.move_fee, constants.board_width, constants.board_height
            );
            *self.constants.write() = Some(constants);
        }

        let height = self.ledger.block_number().await?;
        self.cursor.advance(height);
        info!("Initial block number: {}", height);

        // Subscribe first: events emitted while the resync runs wait in the
        // stream instead of being missed
        let mut stream = self.ledger.subscribe().await?;
        self.resync_with_retries().await?;
        let replayed = self.replay_buffered(&mut stream).await?;
        if replayed > 0 {
            debug!("Replayed {} events buffered during resync", replayed);
        }

        let mut slot = self.session.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Err(RelayError::Stopped);
        }

        // Marked live before any session task can report a failure
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.connected.store(true, Ordering::Release);
        info!("Ledger connection established (session {})", generation);
        self.publish(ServerMessage::ConnectionStatus { connected: true });
        self.publish(ServerMessage::BlockUpdate { height: self.cursor.get() });

        *slot = Some(Session {
            generation,
            tasks: vec![
                tokio::spawn(pump(self.clone(), stream, generation)),
                tokio::spawn(block_timeout_monitor(self.clone(), generation)),
                tokio::spawn(health_monitor(self.clone(), generation)),
            ],
            probes: Vec::new(),
        });
        Ok(())
    }

    /// Apply whatever the subscription delivered while the resync ran.
    ///
    /// A buffered move whose position the snapshot already shows is skipped,
    /// so its fee is not charged a second time.
    async fn replay_buffered(self: &Arc<Self>, stream: &mut ChainEventStream) -> Result<usize, RelayError> {
        let mut replayed = 0;
        while let Some(item) = stream.next().now_or_never() {
            match item {
                Some(Ok(ChainEvent::Block(height))) => self.handle_block(height).await,
                Some(Ok(ChainEvent::Domain(event))) => {
                    if let DomainEvent::Moved { address, position } = &event {
                        if self.store.get(address).map(|p| p.position()) == Some(*position) {
                            debug!("Buffered move of {} already in snapshot", address.short());
                            continue;
                        }
                    }
                    self.handle_event(event).await;
                }
                Some(Err(e)) => return Err(RelayError::Ledger(e)),
                None => return Err(RelayError::Ledger(LedgerError::SubscriptionClosed)),
            }
            replayed += 1;
        }
        Ok(replayed)
    }

    /// Abort session tasks and detach the subscription. Idempotent.
    fn teardown(&self) {
        if self.session.lock().take().is_some() {
            debug!("Session torn down");
        }
    }

    /// Called by session tasks. Only the first failure of the current
    /// session acts.
    fn on_failure(self: &Arc<Self>, generation: u64, reason: RelayError) {
        let session = {
            let mut slot = self.session.lock();
            if slot.as_ref().map(|s| s.generation) != Some(generation) {
                debug!("Ignoring failure on inactive session {}: {}", generation, reason);
                return;
            }
            self.connected.store(false, Ordering::Release);
            error!("Ledger session {} failed: {}", generation, reason);
            self.publish(ServerMessage::ConnectionStatus { connected: false });
            slot.take()
        };
        drop(session);
        self.schedule_reconnect();
    }

    /// Arm the reconnect timer unless one is already armed
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let mut slot = self.reconnect.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Reconnect already scheduled");
            return;
        }

        let delay = self.config.reconnect_delay;
        info!("Reconnecting in {:?}", delay);
        let shared = self.clone();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.reconnect.lock().take();
            match shared.connect().await {
                Ok(()) => {}
                Err(RelayError::AlreadyConnecting) | Err(RelayError::Stopped) => {}
                Err(e) => {
                    error!("Reconnect failed: {}", e);
                    shared.schedule_reconnect();
                }
            }
        }));
    }

    async fn resync(&self) -> Result<usize, LedgerError> {
        let mut writer = self.store.write().await;
        let participants = fetch_participants(self.ledger.as_ref()).await?;
        let count = participants.len();
        let full = writer.replace_all(participants);
        self.publish(full);
        info!("Resynced {} participants", count);
        Ok(count)
    }

    async fn resync_with_retries(&self) -> Result<usize, RelayError> {
        let attempts = self.config.resync_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match self.resync().await {
                Ok(count) => return Ok(count),
                Err(e) => {
                    warn!("Resync attempt {}/{} failed: {}", attempt, attempts, e);
                    last = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.resync_retry_delay).await;
                    }
                }
            }
        }
        Err(RelayError::ResyncExhausted {
            attempts,
            last: last.unwrap_or(LedgerError::SubscriptionClosed),
        })
    }

    async fn handle_event(&self, event: DomainEvent) {
        debug!("{} event", event.name());
        let fee = self.move_fee();
        let mut writer = self.store.write().await;
        if let Some(delta) = writer.apply(&event, fee) {
            // Published under the writer so fan-out order matches mutation order
            self.publish(delta);
        }
    }

    async fn handle_block(self: &Arc<Self>, height: Height) {
        if !self.cursor.advance(height) {
            debug!("Block {} does not advance height {}", height, self.cursor.get());
            return;
        }
        self.publish(ServerMessage::BlockUpdate { height });

        for action in self.tracker.expire_at_height(height) {
            info!("Action {} expired (deadline {}, height {})", action.action_id, action.deadline, height);
            self.publish(ServerMessage::ActionExpired {
                action_id: action.action_id,
                kind: action.kind,
                deadline: action.deadline,
            });
        }

        let pending = self.tracker.pending();
        if pending.is_empty() {
            return;
        }
        match self.session.lock().as_mut() {
            Some(session) => {
                session.probes.retain(|probe| !probe.is_finished());
                session.probes.push(tokio::spawn(probe_receipts(self.clone(), pending)));
            }
            None => debug!("No live session, receipt probe for block {} skipped", height),
        }
    }
}

/// Best-effort receipt lookup for every still-pending action
async fn probe_receipts(shared: Arc<RelayShared>, pending: Vec<PendingAction>) {
    let lookups = pending.iter().map(|action| shared.ledger.receipt(&action.action_id));
    let results = join_all(lookups).await;
    if shared.stopped.load(Ordering::Acquire) {
        return;
    }

    for (action, result) in pending.into_iter().zip(results) {
        let receipt = match result {
            Ok(Some(receipt)) => receipt,
            Ok(None) => continue,
            Err(e) => {
                debug!("Receipt probe for {} failed: {}", action.action_id, e);
                continue;
            }
        };

        match receipt.status {
            ReceiptStatus::Success => {
                if let Some(action) = shared.tracker.confirm(&action.action_id) {
                    info!("Action {} confirmed in block {}", action.action_id, receipt.block_number);
                    shared.publish(ServerMessage::ActionConfirmed {
                        action_id: action.action_id,
                        kind: action.kind,
                        height: receipt.block_number,
                    });
                }
            }
            ReceiptStatus::Reverted => {
                if let Some(action) = shared.tracker.fail(&action.action_id) {
                    warn!("Action {} reverted in block {}", action.action_id, receipt.block_number);
                    shared.publish(ServerMessage::ActionFailed {
                        action_id: action.action_id,
                        kind: action.kind,
                        reason: "reverted".to_string(),
                    });
                }
            }
        }
    }
}

async fn pump(shared: Arc<RelayShared>, mut stream: ChainEventStream, generation: u64) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(ChainEvent::Block(height)) => shared.handle_block(height).await,
            Ok(ChainEvent::Domain(event)) => shared.handle_event(event).await,
            Err(e) => {
                shared.on_failure(generation, RelayError::Ledger(e));
                return;
            }
        }
    }
    shared.on_failure(generation, RelayError::Ledger(LedgerError::SubscriptionClosed));
}

async fn block_timeout_monitor(shared: Arc<RelayShared>, generation: u64) {
    let mut interval = tokio::time::interval(shared.config.block_check_interval);
    loop {
        interval.tick().await;
        let silence = shared.cursor.since_last_update().unwrap_or_default();
        if silence > shared.config.block_timeout {
            shared.on_failure(generation, RelayError::BlockTimeout(silence));
            return;
        }
    }
}

async fn health_monitor(shared: Arc<RelayShared>, generation: u64) {
    let mut interval = tokio::time::interval(shared.config.health_check_interval);
    // First tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        match shared.ledger.block_number().await {
            Ok(height) => debug!("Health check ok at height {}", height),
            Err(e) => {
                shared.on_failure(generation, RelayError::HealthCheck(e));
                return;
            }
        }
    }
}
