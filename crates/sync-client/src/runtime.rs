//! Client runtime
//!
//! Async driver for `ClientSession`. Carries out the transport reconciler's
//! commands with owned task handles:
//! - one connection task reading the push channel and draining an outbox
//! - a ping task while live
//! - participant and block height polls while the push channel is down
//! - a single reconnect timer
//!
//! Receipt fallback checks and sequence resyncs run for the runtime's whole
//! lifetime. Action submission returns as soon as the move is queued; the
//! outcome arrives later as a `ClientUpdate::Outcome`.

use crate::{
    error::ClientError,
    sequencer::NonceSequencer,
    session::{ActionRequest, ActionSubmitter, Applied, ClientSession},
    transport::{TransportCommand, TransportEvent, TransportReconciler, TransportState},
    ClientConfig,
};
use agar_types::{
    ActionId, ActionKind, ActionOutcome, Address, Amount, ClientMessage, Direction, GameConstants, Height,
    Participant, PendingAction, Position, ServerMessage,
};
use chain_relay::{fetch_participants, LedgerClient};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Change notification for renderers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientUpdate {
    /// Confirmed participant set changed
    Participants,
    /// Local move queue changed
    Queue,
    Height(Height),
    Outcome(ActionOutcome),
    Transport(TransportState),
}

#[derive(Default)]
struct Tasks {
    connection: Option<JoinHandle<()>>,
    ping: Option<JoinHandle<()>>,
    polling: Vec<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

fn abort(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

struct RuntimeInner {
    config: ClientConfig,
    ledger: Arc<dyn LedgerClient>,
    submitter: Option<Arc<dyn ActionSubmitter>>,
    sequencer: Option<NonceSequencer>,
    session: Mutex<ClientSession>,
    transport: Mutex<TransportReconciler>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    tasks: Mutex<Tasks>,
    updates: broadcast::Sender<ClientUpdate>,
}

/// Client runtime handle
#[derive(Clone)]
pub struct ClientRuntime {
    inner: Arc<RuntimeInner>,
}

impl ClientRuntime {
    /// `me` is the local participant; `None` runs a read-only observer
    pub fn new(
        config: ClientConfig,
        ledger: Arc<dyn LedgerClient>,
        me: Option<Address>,
        submitter: Option<Arc<dyn ActionSubmitter>>,
    ) -> Self {
        let (updates, _) = broadcast::channel(config.update_capacity.max(1));
        let sequencer = me.clone().map(|address| NonceSequencer::new(address, ledger.clone()));
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                ledger,
                submitter,
                sequencer,
                session: Mutex::new(ClientSession::new(me, GameConstants::default())),
                transport: Mutex::new(TransportReconciler::new()),
                outgoing: Mutex::new(None),
                tasks: Mutex::new(Tasks::default()),
                updates,
            }),
        }
    }

    /// Load constants, read the ledger once, then open the push channel
    pub async fn start(&self) -> Result<(), ClientError> {
        let constants = self.inner.ledger.game_constants().await?;
        self.inner.session.lock().set_constants(constants);

        match fetch_participants(self.inner.ledger.as_ref()).await {
            Ok(participants) => {
                let applied = self.inner.session.lock().apply_poll(participants);
                self.inner.publish_applied(applied);
            }
            Err(e) => warn!("Initial participant read failed: {}", e),
        }

        if let Some(sequencer) = &self.inner.sequencer {
            if let Err(e) = sequencer.initialize().await {
                warn!("Sequence initialization failed, retrying on resync: {}", e);
            }
        }

        self.inner.handle(TransportEvent::Start);

        let receipts = tokio::spawn(receipt_check_loop(self.inner.clone()));
        let nonces = tokio::spawn(nonce_resync_loop(self.inner.clone()));
        self.inner.tasks.lock().background.extend([receipts, nonces]);
        Ok(())
    }

    /// Close the push channel and cancel every timer
    pub fn stop(&self) {
        self.inner.handle(TransportEvent::Stop);
        for handle in self.inner.tasks.lock().background.drain(..) {
            handle.abort();
        }
        info!("Client stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientUpdate> {
        self.inner.updates.subscribe()
    }

    /// Queue a move and submit it in the background.
    ///
    /// Returns the provisional identifier immediately.
    pub fn submit_move(&self, direction: Direction) -> Result<ActionId, ClientError> {
        let submitter = self.inner.submitter.clone().ok_or(ClientError::NoSubmitter)?;
        let sequencer = self.inner.sequencer.as_ref().ok_or(ClientError::NoParticipant)?;

        let action = {
            let mut session = self.inner.session.lock();
            session.local_participant()?;
            let sequence = sequencer.reserve()?;
            session.queue_move(direction, sequence)?
        };
        self.inner.publish(ClientUpdate::Queue);

        let request = ActionRequest {
            kind: ActionKind::Move,
            direction: Some(direction),
            value: None,
            deadline: action.deadline,
            sequence: action.sequence.unwrap_or_default(),
        };
        Ok(self.spawn_submission(submitter, request, action))
    }

    /// Submit a join, leave or redeposit in the background
    pub fn submit_action(&self, kind: ActionKind, value: Option<Amount>) -> Result<ActionId, ClientError> {
        let submitter = self.inner.submitter.clone().ok_or(ClientError::NoSubmitter)?;
        let sequencer = self.inner.sequencer.as_ref().ok_or(ClientError::NoParticipant)?;

        let (action, sequence) = {
            let mut session = self.inner.session.lock();
            let sequence = sequencer.reserve()?;
            (session.queue_action(kind, sequence)?, sequence)
        };

        let request = ActionRequest {
            kind,
            direction: None,
            value,
            deadline: action.deadline,
            sequence,
        };
        Ok(self.spawn_submission(submitter, request, action))
    }

    fn spawn_submission(
        &self,
        submitter: Arc<dyn ActionSubmitter>,
        request: ActionRequest,
        action: PendingAction,
    ) -> ActionId {
        let inner = self.inner.clone();
        let provisional = action.action_id.clone();
        tokio::spawn(async move {
            match submitter.submit(&request).await {
                Ok(real) => {
                    debug!("{} {} accepted as {}", action.kind, action.action_id, real);
                    let announce = inner.session.lock().bind(&action.action_id, real);
                    if let Some(msg) = announce {
                        inner.send(msg);
                    }
                }
                Err(e) => {
                    warn!("Submission of {} failed: {}", action.kind, e);
                    let outcome = inner.session.lock().reject(&action.action_id, e.to_string());
                    if let Some(outcome) = outcome {
                        inner.publish(ClientUpdate::Outcome(outcome));
                        inner.publish(ClientUpdate::Queue);
                    }
                }
            }
        });
        provisional
    }

    pub fn transport_state(&self) -> TransportState {
        self.inner.transport.lock().state()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.inner.session.lock().participants()
    }

    pub fn participant(&self, address: &Address) -> Option<Participant> {
        self.inner.session.lock().mirror().get(address).cloned()
    }

    pub fn is_joined(&self) -> bool {
        self.inner.session.lock().is_joined()
    }

    pub fn projected_position(&self) -> Option<Position> {
        self.inner.session.lock().projected_position()
    }

    pub fn queued_previews(&self) -> Vec<Position> {
        self.inner.session.lock().queued_previews()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.session.lock().queue().len()
    }

    pub fn pending(&self) -> Vec<PendingAction> {
        self.inner.session.lock().pending()
    }

    pub fn height(&self) -> Height {
        self.inner.session.lock().height()
    }

    pub fn next_sequence(&self) -> Option<u64> {
        self.inner.sequencer.as_ref().and_then(NonceSequencer::peek)
    }
}

impl RuntimeInner {
    fn handle(self: &Arc<Self>, event: TransportEvent) {
        let (commands, before, after) = {
            let mut transport = self.transport.lock();
            let before = transport.state();
            let commands = transport.handle(event);
            (commands, before, transport.state())
        };
        for command in commands {
            self.execute(command);
        }
        if before != after {
            info!("Transport {:?} -> {:?}", before, after);
            self.publish(ClientUpdate::Transport(after));
        }
    }

    fn execute(self: &Arc<Self>, command: TransportCommand) {
        let mut tasks = self.tasks.lock();
        match command {
            TransportCommand::OpenConnection => {
                abort(tasks.connection.take());
                tasks.connection = Some(tokio::spawn(run_connection(self.clone())));
            }
            TransportCommand::CloseConnection => {
                self.outgoing.lock().take();
                abort(tasks.connection.take());
            }
            TransportCommand::RequestSync => {
                self.send(ClientMessage::RequestSync);
            }
            TransportCommand::StartPing => {
                abort(tasks.ping.take());
                tasks.ping = Some(tokio::spawn(ping_loop(self.clone())));
            }
            TransportCommand::StopPing => abort(tasks.ping.take()),
            TransportCommand::StartPolling => {
                for handle in tasks.polling.drain(..) {
                    handle.abort();
                }
                tasks.polling.push(tokio::spawn(participant_poll_loop(self.clone())));
                tasks.polling.push(tokio::spawn(height_poll_loop(self.clone())));
            }
            TransportCommand::StopPolling => {
                for handle in tasks.polling.drain(..) {
                    handle.abort();
                }
            }
            TransportCommand::ScheduleReconnect => {
                abort(tasks.reconnect.take());
                let inner = self.clone();
                let delay = self.config.reconnect_delay;
                tasks.reconnect = Some(tokio::spawn(async move {
                    sleep(delay).await;
                    inner.handle(TransportEvent::ReconnectTimerFired);
                }));
            }
            TransportCommand::CancelReconnect => abort(tasks.reconnect.take()),
        }
    }

    fn on_server_message(self: &Arc<Self>, msg: ServerMessage) {
        if let ServerMessage::ConnectionStatus { connected } = msg {
            self.handle(TransportEvent::UpstreamStatus(connected));
        }
        let applied = self.session.lock().apply_server(&msg);
        self.publish_applied(applied);
    }

    fn send(&self, msg: ClientMessage) -> bool {
        match self.outgoing.lock().as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    fn publish(&self, update: ClientUpdate) {
        // No receivers is fine
        let _ = self.updates.send(update);
    }

    fn publish_applied(&self, applied: Applied) {
        if applied.participants_changed {
            self.publish(ClientUpdate::Participants);
        }
        if applied.height_changed {
            let height = self.session.lock().height();
            self.publish(ClientUpdate::Height(height));
        }
        let queue_changed = !applied.outcomes.is_empty();
        for outcome in applied.outcomes {
            self.publish(ClientUpdate::Outcome(outcome));
        }
        if queue_changed {
            self.publish(ClientUpdate::Queue);
        }
    }
}

/// One push channel connection, from handshake to close
async fn run_connection(inner: Arc<RuntimeInner>) {
    let url = inner.config.ws_url.clone();
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!("Connecting to {} failed: {}", url, e);
            inner.handle(TransportEvent::ConnectFailed);
            return;
        }
    };
    info!("Connected to {}", url);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ClientMessage>();
    *inner.outgoing.lock() = Some(outbox);
    inner.handle(TransportEvent::Connected);

    let writer = async move {
        while let Some(msg) = outbox_rx.recv().await {
            if ws_sender.send(Message::Text(msg.to_json())).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(msg) => inner.on_server_message(msg),
                    Err(e) => warn!("Dropping malformed server message: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Push channel error: {}", e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    inner.outgoing.lock().take();
    warn!("Push channel to {} closed", url);
    inner.handle(TransportEvent::Disconnected);
}

async fn ping_loop(inner: Arc<RuntimeInner>) {
    let mut ticker = interval(inner.config.ping_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !inner.send(ClientMessage::Ping) {
            debug!("Ping skipped, no connection");
        }
    }
}

/// Direct participant reads standing in for push delivery
async fn participant_poll_loop(inner: Arc<RuntimeInner>) {
    let mut ticker = interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match fetch_participants(inner.ledger.as_ref()).await {
            Ok(participants) => {
                let applied = inner.session.lock().apply_poll(participants);
                inner.publish_applied(applied);
            }
            Err(e) => debug!("Participant poll failed: {}", e),
        }
    }
}

async fn height_poll_loop(inner: Arc<RuntimeInner>) {
    let mut ticker = interval(inner.config.block_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match inner.ledger.block_number().await {
            Ok(height) => {
                let applied = inner.session.lock().observe_height(height);
                inner.publish_applied(applied);
            }
            Err(e) => debug!("Height poll failed: {}", e),
        }
    }
}

/// Catch outcomes the push channel missed by reading receipts directly
async fn receipt_check_loop(inner: Arc<RuntimeInner>) {
    let mut ticker = interval(inner.config.receipt_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let due = inner
            .session
            .lock()
            .due_for_receipt(chrono::Utc::now(), inner.config.receipt_check_age);
        for action_id in due {
            match inner.ledger.receipt(&action_id).await {
                Ok(Some(receipt)) => {
                    let outcome = inner.session.lock().apply_receipt(&receipt);
                    if let Some(outcome) = outcome {
                        info!("Receipt check resolved {}", outcome.action_id);
                        inner.publish(ClientUpdate::Outcome(outcome));
                        inner.publish(ClientUpdate::Queue);
                    }
                }
                // Not mined yet
                Ok(None) => {}
                Err(e) => debug!("Receipt check for {} failed: {}", action_id, e),
            }
        }
    }
}

async fn nonce_resync_loop(inner: Arc<RuntimeInner>) {
    let Some(sequencer) = inner.sequencer.as_ref() else {
        return;
    };
    let mut ticker = interval(inner.config.nonce_resync_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let result = if sequencer.is_initialized() {
            sequencer.resync().await.map(|_| ())
        } else {
            sequencer.initialize().await.map(|_| ())
        };
        if let Err(e) = result {
            warn!("Sequence resync failed: {}", e);
        }
    }
}
