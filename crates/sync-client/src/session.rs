//! Client session
//!
//! Everything the client knows, without I/O: the confirmed mirror, the local
//! pending actions, the move queue and the block cursor. The runtime feeds it
//! server messages, poll results and receipts; renderers read projections.
//!
//! After every input the session settles:
//! - the local participant gone from confirmed state clears the move queue
//! - a changed pending set reconciles the move queue against it

use crate::{
    error::ClientError, mirror::ConfirmedMirror, projector::OptimisticProjector, projector::QueuedMove,
    tracker::LocalActionTracker,
};
use agar_state::BlockCursor;
use agar_types::{
    ActionId, ActionKind, ActionOutcome, Address, Amount, ClientMessage, Direction, GameConstants, Height,
    Participant, PendingAction, Position, Receipt, ServerMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Parameters handed to the action submitter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub direction: Option<Direction>,
    /// Deposit for join and redeposit
    pub value: Option<Amount>,
    pub deadline: Height,
    pub sequence: u64,
}

/// Submits actions to the network (wallet signing lives behind this)
#[async_trait]
pub trait ActionSubmitter: Send + Sync {
    /// Returns the action identifier once the network accepted the action
    async fn submit(&self, request: &ActionRequest) -> Result<ActionId, ClientError>;
}

/// Result of applying one input
#[derive(Debug, Default)]
pub struct Applied {
    pub participants_changed: bool,
    pub height_changed: bool,
    pub outcomes: Vec<ActionOutcome>,
}

pub struct ClientSession {
    me: Option<Address>,
    constants: GameConstants,
    mirror: ConfirmedMirror,
    tracker: LocalActionTracker,
    projector: OptimisticProjector,
    cursor: BlockCursor,
    upstream_connected: bool,
    last_update: Option<DateTime<Utc>>,
    reconciled_version: u64,
}

impl ClientSession {
    pub fn new(me: Option<Address>, constants: GameConstants) -> Self {
        Self {
            me,
            constants,
            mirror: ConfirmedMirror::new(),
            tracker: LocalActionTracker::new(),
            projector: OptimisticProjector::new(),
            cursor: BlockCursor::new(),
            upstream_connected: false,
            last_update: None,
            reconciled_version: 0,
        }
    }

    pub fn set_constants(&mut self, constants: GameConstants) {
        self.constants = constants;
    }

    /// Apply one message from the hub
    pub fn apply_server(&mut self, msg: &ServerMessage) -> Applied {
        let mut applied = Applied::default();
        match msg {
            ServerMessage::ConnectionStatus { connected } => self.upstream_connected = *connected,
            ServerMessage::BlockUpdate { height } => {
                applied.height_changed = self.cursor.advance(*height);
                applied.outcomes = self.expire();
            }
            ServerMessage::ActionConfirmed { .. }
            | ServerMessage::ActionExpired { .. }
            | ServerMessage::ActionFailed { .. } => {
                applied.outcomes.extend(self.tracker.apply_server(msg));
            }
            ServerMessage::Pong => {}
            _ => {
                applied.participants_changed = self.mirror.apply(msg);
                self.last_update = Some(Utc::now());
            }
        }
        self.settle();
        applied
    }

    /// Replace confirmed state with a direct ledger read
    pub fn apply_poll(&mut self, participants: Vec<Participant>) -> Applied {
        self.mirror.replace_all(participants);
        self.last_update = Some(Utc::now());
        self.settle();
        Applied {
            participants_changed: true,
            ..Applied::default()
        }
    }

    /// Record a height read directly from the ledger
    pub fn observe_height(&mut self, height: Height) -> Applied {
        let height_changed = self.cursor.advance(height);
        let outcomes = self.expire();
        self.settle();
        Applied {
            height_changed,
            outcomes,
            ..Applied::default()
        }
    }

    /// Record a receipt found by the fallback check
    pub fn apply_receipt(&mut self, receipt: &Receipt) -> Option<ActionOutcome> {
        let outcome = self.tracker.apply_receipt(receipt);
        self.settle();
        outcome
    }

    /// Queue a move for the local participant and track it provisionally
    pub fn queue_move(&mut self, direction: Direction, sequence: u64) -> Result<PendingAction, ClientError> {
        let me = self.local_participant()?.address.clone();
        let provisional = self.projector.enqueue(direction);
        let action = PendingAction::new(provisional, ActionKind::Move, self.deadline_for(ActionKind::Move))
            .with_participant(me)
            .with_move(direction, sequence);
        self.track(action.clone());
        Ok(action)
    }

    /// Track a join, leave or redeposit provisionally
    pub fn queue_action(&mut self, kind: ActionKind, sequence: u64) -> Result<PendingAction, ClientError> {
        let me = self.me.clone().ok_or(ClientError::NoParticipant)?;
        let provisional = ActionId::provisional(sequence, None);
        let action = PendingAction::new(provisional, kind, self.deadline_for(kind)).with_participant(me);
        self.track(action.clone());
        Ok(action)
    }

    /// Attach the real identifier returned by submission.
    ///
    /// Returns the `track-action` message to announce, or `None` if the
    /// action already resolved.
    pub fn bind(&mut self, provisional: &ActionId, real: ActionId) -> Option<ClientMessage> {
        self.projector.bind(provisional, real.clone());
        let announced = self.tracker.bind(provisional, real)?;
        self.settle();
        Some(ClientMessage::track(&announced))
    }

    /// End an action whose submission failed
    pub fn reject(&mut self, provisional: &ActionId, reason: impl Into<String>) -> Option<ActionOutcome> {
        let outcome = self.tracker.reject(provisional, reason);
        self.settle();
        outcome
    }

    fn track(&mut self, action: PendingAction) {
        debug!("queued {} {}", action.kind, action.action_id);
        self.tracker.track(action);
        self.reconciled_version = self.tracker.version();
    }

    fn expire(&mut self) -> Vec<ActionOutcome> {
        self.tracker.expire_at_height(self.cursor.get())
    }

    fn settle(&mut self) {
        if let Some(me) = &self.me {
            if !self.mirror.contains(me) && !self.projector.is_empty() {
                debug!("local participant gone, clearing {} queued moves", self.projector.queue().len());
                self.projector.clear();
            }
        }
        if self.tracker.version() != self.reconciled_version {
            self.projector.reconcile(&self.tracker.pending_ids());
            self.reconciled_version = self.tracker.version();
        }
    }

    pub fn me(&self) -> Option<&Address> {
        self.me.as_ref()
    }

    /// The local participant's confirmed record
    pub fn local_participant(&self) -> Result<&Participant, ClientError> {
        let me = self.me.as_ref().ok_or(ClientError::NoParticipant)?;
        self.mirror.get(me).ok_or(ClientError::NoParticipant)
    }

    pub fn is_joined(&self) -> bool {
        self.local_participant().is_ok()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.mirror.snapshot()
    }

    pub fn mirror(&self) -> &ConfirmedMirror {
        &self.mirror
    }

    /// Predicted position of the local participant
    pub fn projected_position(&self) -> Option<Position> {
        self.projector
            .projected(self.local_participant().ok(), &self.constants)
    }

    /// Predicted position after each queued move
    pub fn queued_previews(&self) -> Vec<Position> {
        self.projector
            .previews(self.local_participant().ok(), &self.constants)
    }

    pub fn queue(&self) -> &[QueuedMove] {
        self.projector.queue()
    }

    pub fn pending(&self) -> Vec<PendingAction> {
        self.tracker.pending()
    }

    pub fn due_for_receipt(&self, now: DateTime<Utc>, min_age: Duration) -> Vec<ActionId> {
        self.tracker.due_for_receipt(now, min_age)
    }

    pub fn height(&self) -> Height {
        self.cursor.get()
    }

    pub fn deadline_for(&self, kind: ActionKind) -> Height {
        self.cursor.deadline_for(kind)
    }

    pub fn is_upstream_connected(&self) -> bool {
        self.upstream_connected
    }

    /// Age of the newest confirmed state
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn constants(&self) -> &GameConstants {
        &self.constants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agar_types::{rules, LeaveReason, OutcomeStatus};

    fn constants() -> GameConstants {
        GameConstants {
            move_fee: 1,
            min_value: 100,
            max_value: 1100,
            board_width: 1000,
            board_height: 1000,
            velocity_min: 10,
            velocity_max: 50,
        }
    }

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn joined(a: &Address, value: Amount, x: u64, y: u64) -> ServerMessage {
        ServerMessage::ParticipantJoined {
            address: a.clone(),
            value,
            x,
            y,
        }
    }

    #[test]
    fn test_join_move_confirm() {
        let a = addr(1);
        let mut session = ClientSession::new(Some(a.clone()), constants());
        session.apply_server(&ServerMessage::BlockUpdate { height: 10 });
        session.apply_server(&joined(&a, 100, 500, 500));

        let v = rules::velocity(100, &constants());
        let action = session.queue_move(Direction::Up, 0).unwrap();
        assert_eq!(action.deadline, 30);
        let predicted = session.projected_position();
        assert_eq!(predicted, Some(Position::new(500, 500 - v)));

        let announce = session.bind(&action.action_id, ActionId::new("0xm1")).unwrap();
        assert!(matches!(announce, ClientMessage::TrackAction { ref action_id, .. } if *action_id == ActionId::new("0xm1")));

        session.apply_server(&ServerMessage::ParticipantMoved {
            address: a.clone(),
            x: 500,
            y: 500 - v,
            value: 99,
        });
        let applied = session.apply_server(&ServerMessage::ActionConfirmed {
            action_id: ActionId::new("0xm1"),
            kind: ActionKind::Move,
            height: 12,
        });
        assert_eq!(applied.outcomes.len(), 1);

        assert!(session.queue().is_empty());
        let confirmed = session.local_participant().unwrap().position();
        assert_eq!(Some(confirmed), predicted);
        assert_eq!(session.projected_position(), predicted);
    }

    #[test]
    fn test_absorption_clears_loser_queue() {
        let w = addr(2);
        let l = addr(3);
        let mut session = ClientSession::new(Some(l.clone()), constants());
        session.apply_server(&ServerMessage::FullSync {
            participants: vec![
                Participant::new(w.clone(), 50, Position::new(10, 10)),
                Participant::new(l.clone(), 30, Position::new(12, 10)),
            ],
        });
        session.queue_move(Direction::Left, 0).unwrap();
        session.queue_move(Direction::Left, 1).unwrap();
        assert_eq!(session.queue().len(), 2);

        let applied = session.apply_server(&ServerMessage::ParticipantsCollided {
            winner: w.clone(),
            loser: l.clone(),
            winner_new_value: 80,
        });
        assert!(applied.participants_changed);
        assert!(session.queue().is_empty());
        assert_eq!(session.projected_position(), None);
        assert_eq!(session.mirror().get(&w).map(|p| p.value), Some(80));
        assert!(!session.is_joined());
    }

    #[test]
    fn test_resync_supersedes_stale_delta() {
        let x = addr(4);
        let mut session = ClientSession::new(None, constants());
        session.apply_server(&ServerMessage::ParticipantMoved {
            address: x.clone(),
            x: 1,
            y: 1,
            value: 10,
        });
        assert!(session.mirror().contains(&x));

        session.apply_server(&ServerMessage::FullSync {
            participants: vec![Participant::new(addr(5), 7, Position::new(2, 2))],
        });
        assert!(!session.mirror().contains(&x));
        assert_eq!(session.participants().len(), 1);
    }

    #[test]
    fn test_block_updates_expire_local_actions() {
        let a = addr(6);
        let mut session = ClientSession::new(Some(a.clone()), constants());
        session.apply_server(&ServerMessage::BlockUpdate { height: 990 });
        session.apply_server(&joined(&a, 200, 50, 50));
        let action = session.queue_move(Direction::Down, 3).unwrap();
        assert_eq!(action.deadline, 1010);

        assert!(session.apply_server(&ServerMessage::BlockUpdate { height: 1010 }).outcomes.is_empty());
        let applied = session.observe_height(1011);
        assert_eq!(applied.outcomes.len(), 1);
        assert_eq!(applied.outcomes[0].status, OutcomeStatus::Expired { deadline: 1010 });
        assert!(session.queue().is_empty());

        // A late server signal for the same action is ignored
        assert!(session
            .apply_server(&ServerMessage::ActionExpired {
                action_id: action.action_id.clone(),
                kind: ActionKind::Move,
                deadline: 1010,
            })
            .outcomes
            .is_empty());
    }

    #[test]
    fn test_rejected_submission_drops_queued_move() {
        let a = addr(7);
        let mut session = ClientSession::new(Some(a.clone()), constants());
        session.apply_poll(vec![Participant::new(a.clone(), 100, Position::new(300, 300))]);
        let first = session.queue_move(Direction::Right, 0).unwrap();
        session.queue_move(Direction::Right, 1).unwrap();

        let outcome = session.reject(&first.action_id, "rejected").unwrap();
        assert!(matches!(outcome.status, OutcomeStatus::Failed { .. }));
        assert_eq!(session.queue().len(), 1);
        assert_eq!(session.projected_position(), Some(Position::new(350, 300)));
    }

    #[test]
    fn test_moves_require_confirmed_participant() {
        let mut session = ClientSession::new(Some(addr(8)), constants());
        assert!(matches!(session.queue_move(Direction::Up, 0), Err(ClientError::NoParticipant)));
        assert!(session.queue_action(ActionKind::Join, 0).is_ok());

        let mut observer = ClientSession::new(None, constants());
        assert!(matches!(observer.queue_action(ActionKind::Join, 0), Err(ClientError::NoParticipant)));
    }

    #[test]
    fn test_leaving_clears_queue() {
        let a = addr(9);
        let mut session = ClientSession::new(Some(a.clone()), constants());
        session.apply_server(&joined(&a, 100, 20, 20));
        session.queue_move(Direction::Up, 0).unwrap();
        session.apply_server(&ServerMessage::ParticipantLeft {
            address: a.clone(),
            reason: LeaveReason::Died,
        });
        assert!(session.queue().is_empty());
        assert!(session.queued_previews().is_empty());
    }
}
