//! Client-side pending action tracker
//!
//! Same bookkeeping as the server tracker, keyed by whatever identifier the
//! action had when it was queued. A provisional identifier can later be bound
//! to the real one; server signals and receipts are matched through that
//! substitution first and by their own identifier second. The server wins:
//! a terminal signal removes the local entry even if local expiry has not
//! caught up yet.

use agar_state::ActionTracker;
use agar_types::{
    ActionId, ActionOutcome, Height, OutcomeStatus, PendingAction, Receipt, ReceiptStatus, ServerMessage,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
pub struct LocalActionTracker {
    inner: ActionTracker,
    /// provisional -> real
    bound: HashMap<ActionId, ActionId>,
    /// real -> provisional
    substitutions: HashMap<ActionId, ActionId>,
    version: u64,
}

impl LocalActionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremented whenever the pending set changes
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn track(&mut self, action: PendingAction) -> bool {
        let tracked = self.inner.track(action);
        if tracked {
            self.version += 1;
        }
        tracked
    }

    /// Attach the real identifier to a provisional entry.
    ///
    /// Returns the record as it should be announced upstream, or `None` if
    /// the entry already reached a terminal state.
    pub fn bind(&mut self, provisional: &ActionId, real: ActionId) -> Option<PendingAction> {
        let mut action = self.inner.get(provisional)?;
        self.bound.insert(provisional.clone(), real.clone());
        self.substitutions.insert(real.clone(), provisional.clone());
        self.version += 1;
        action.action_id = real;
        Some(action)
    }

    /// Apply an authoritative lifecycle signal
    pub fn apply_server(&mut self, msg: &ServerMessage) -> Option<ActionOutcome> {
        let (id, status) = match msg {
            ServerMessage::ActionConfirmed { action_id, height, .. } => {
                (action_id, OutcomeStatus::Confirmed { height: *height })
            }
            ServerMessage::ActionExpired { action_id, deadline, .. } => {
                (action_id, OutcomeStatus::Expired { deadline: *deadline })
            }
            ServerMessage::ActionFailed { action_id, reason, .. } => {
                (action_id, OutcomeStatus::Failed { reason: reason.clone() })
            }
            _ => return None,
        };
        self.resolve(id, status)
    }

    /// Apply a receipt found by the fallback check. Both statuses end tracking.
    pub fn apply_receipt(&mut self, receipt: &Receipt) -> Option<ActionOutcome> {
        let status = match receipt.status {
            ReceiptStatus::Success => OutcomeStatus::Confirmed {
                height: receipt.block_number,
            },
            ReceiptStatus::Reverted => OutcomeStatus::Failed {
                reason: "reverted".to_string(),
            },
        };
        self.resolve(&receipt.action_id, status)
    }

    /// End an action whose submission was rejected before it got a real id
    pub fn reject(&mut self, id: &ActionId, reason: impl Into<String>) -> Option<ActionOutcome> {
        self.resolve(id, OutcomeStatus::Failed { reason: reason.into() })
    }

    /// Remove every action whose deadline is strictly below `height`
    pub fn expire_at_height(&mut self, height: Height) -> Vec<ActionOutcome> {
        let expired = self.inner.expire_at_height(height);
        if !expired.is_empty() {
            self.version += 1;
        }
        expired
            .into_iter()
            .map(|action| {
                let deadline = action.deadline;
                self.finish(action, OutcomeStatus::Expired { deadline })
            })
            .collect()
    }

    /// Real identifiers of actions old enough for a direct receipt check
    pub fn due_for_receipt(&self, now: DateTime<Utc>, min_age: Duration) -> Vec<ActionId> {
        let min_age_ms = i64::try_from(min_age.as_millis()).unwrap_or(i64::MAX);
        self.inner
            .pending()
            .into_iter()
            .filter(|a| a.age_ms(now) > min_age_ms)
            .filter_map(|a| self.real_id(&a.action_id))
            .collect()
    }

    /// Every identifier that currently refers to a pending action
    pub fn pending_ids(&self) -> HashSet<ActionId> {
        let mut ids = self.inner.pending_ids();
        let real: Vec<ActionId> = ids.iter().filter_map(|id| self.bound.get(id).cloned()).collect();
        ids.extend(real);
        ids
    }

    pub fn pending(&self) -> Vec<PendingAction> {
        self.inner.pending()
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.inner.contains(self.local_key(id))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn local_key<'a>(&'a self, id: &'a ActionId) -> &'a ActionId {
        self.substitutions.get(id).unwrap_or(id)
    }

    fn real_id(&self, key: &ActionId) -> Option<ActionId> {
        match self.bound.get(key) {
            Some(real) => Some(real.clone()),
            None if !key.is_provisional() => Some(key.clone()),
            None => None,
        }
    }

    fn resolve(&mut self, id: &ActionId, status: OutcomeStatus) -> Option<ActionOutcome> {
        let key = self.local_key(id).clone();
        let action = self.inner.discard(&key)?;
        self.version += 1;
        Some(self.finish(action, status))
    }

    fn finish(&mut self, action: PendingAction, status: OutcomeStatus) -> ActionOutcome {
        let action_id = match self.bound.remove(&action.action_id) {
            Some(real) => {
                self.substitutions.remove(&real);
                real
            }
            None => action.action_id,
        };
        debug!("{} {} finished: {:?}", action.kind, action_id, status);
        ActionOutcome {
            action_id,
            kind: action.kind,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agar_types::{ActionKind, Direction};

    fn move_action(id: ActionId, deadline: Height) -> PendingAction {
        PendingAction::new(id, ActionKind::Move, deadline).with_move(Direction::Up, 1)
    }

    #[test]
    fn test_server_signal_matches_through_substitution() {
        let mut tracker = LocalActionTracker::new();
        let temp = ActionId::provisional(1, Some(Direction::Up));
        tracker.track(move_action(temp.clone(), 50));

        let announced = tracker.bind(&temp, ActionId::new("0xABC")).unwrap();
        assert_eq!(announced.action_id, ActionId::new("0xabc"));
        assert!(tracker.pending_ids().contains(&temp));
        assert!(tracker.pending_ids().contains(&ActionId::new("0xabc")));

        let outcome = tracker
            .apply_server(&ServerMessage::ActionConfirmed {
                action_id: ActionId::new("0xabc"),
                kind: ActionKind::Move,
                height: 42,
            })
            .unwrap();
        assert_eq!(outcome.action_id, ActionId::new("0xabc"));
        assert_eq!(outcome.status, OutcomeStatus::Confirmed { height: 42 });
        assert!(tracker.is_empty());
        assert!(tracker.pending_ids().is_empty());
    }

    #[test]
    fn test_server_signal_matches_by_own_id() {
        let mut tracker = LocalActionTracker::new();
        tracker.track(PendingAction::new(ActionId::new("0x01"), ActionKind::Join, 100));

        let outcome = tracker.apply_server(&ServerMessage::ActionFailed {
            action_id: ActionId::new("0x01"),
            kind: ActionKind::Join,
            reason: "reverted".to_string(),
        });
        assert!(matches!(outcome, Some(ActionOutcome { status: OutcomeStatus::Failed { .. }, .. })));

        // A second signal for the same id is a silent no-op
        assert!(tracker
            .apply_server(&ServerMessage::ActionExpired {
                action_id: ActionId::new("0x01"),
                kind: ActionKind::Join,
                deadline: 100,
            })
            .is_none());
    }

    #[test]
    fn test_local_expiry_is_strict() {
        let mut tracker = LocalActionTracker::new();
        tracker.track(move_action(ActionId::new("0x02"), 1000));

        assert!(tracker.expire_at_height(1000).is_empty());
        let expired = tracker.expire_at_height(1001);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, OutcomeStatus::Expired { deadline: 1000 });
        assert!(tracker.expire_at_height(1002).is_empty());
    }

    #[test]
    fn test_receipt_fallback_statuses() {
        let mut tracker = LocalActionTracker::new();
        tracker.track(move_action(ActionId::new("0x03"), 10));
        tracker.track(move_action(ActionId::new("0x04"), 10));

        let reverted = tracker
            .apply_receipt(&Receipt {
                action_id: ActionId::new("0x03"),
                status: ReceiptStatus::Reverted,
                block_number: 7,
            })
            .unwrap();
        assert_eq!(reverted.status, OutcomeStatus::Failed { reason: "reverted".to_string() });

        let success = tracker
            .apply_receipt(&Receipt {
                action_id: ActionId::new("0x04"),
                status: ReceiptStatus::Success,
                block_number: 8,
            })
            .unwrap();
        assert_eq!(success.status, OutcomeStatus::Confirmed { height: 8 });
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_due_for_receipt_skips_young_and_unbound() {
        let mut tracker = LocalActionTracker::new();
        let mut old = move_action(ActionId::new("0x05"), 10);
        old.submitted_at = Utc::now() - chrono::Duration::seconds(60);
        let mut unbound = move_action(ActionId::provisional(9, None), 10);
        unbound.submitted_at = Utc::now() - chrono::Duration::seconds(60);
        tracker.track(old);
        tracker.track(unbound);
        tracker.track(move_action(ActionId::new("0x06"), 10));

        let due = tracker.due_for_receipt(Utc::now(), Duration::from_secs(30));
        assert_eq!(due, vec![ActionId::new("0x05")]);
    }

    #[test]
    fn test_version_tracks_changes() {
        let mut tracker = LocalActionTracker::new();
        let v0 = tracker.version();
        tracker.track(move_action(ActionId::new("0x07"), 10));
        assert!(tracker.version() > v0);

        let v1 = tracker.version();
        assert!(!tracker.track(move_action(ActionId::new("0x07"), 10)));
        assert!(tracker.expire_at_height(5).is_empty());
        assert_eq!(tracker.version(), v1);
    }
}
