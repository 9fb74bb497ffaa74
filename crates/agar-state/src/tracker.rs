//! Pending action tracker
//!
//! Bookkeeping for in-flight actions. Every terminal operation removes the
//! record under one lock, so when confirm and expire race exactly one of them
//! gets the record and the other is a silent no-op. Removed identifiers are
//! remembered (bounded) so a late `track` cannot resurrect them.

use agar_types::{ActionId, Height, PendingAction};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Default number of retired identifiers remembered
pub const DEFAULT_RETIRED_CAPACITY: usize = 4096;

struct TrackerInner {
    pending: HashMap<ActionId, PendingAction>,
    retired: HashSet<ActionId>,
    retired_order: VecDeque<ActionId>,
    retired_capacity: usize,
}

impl TrackerInner {
    fn retire(&mut self, id: ActionId) {
        if self.retired.insert(id.clone()) {
            self.retired_order.push_back(id);
            while self.retired_order.len() > self.retired_capacity {
                if let Some(old) = self.retired_order.pop_front() {
                    self.retired.remove(&old);
                }
            }
        }
    }

    fn take(&mut self, id: &ActionId) -> Option<PendingAction> {
        let action = self.pending.remove(id)?;
        self.retire(action.action_id.clone());
        Some(action)
    }
}

/// Thread-safe tracker of pending actions keyed by action id
#[derive(Clone)]
pub struct ActionTracker {
    inner: Arc<Mutex<TrackerInner>>,
}

impl ActionTracker {
    pub fn new() -> Self {
        Self::with_retired_capacity(DEFAULT_RETIRED_CAPACITY)
    }

    pub fn with_retired_capacity(retired_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner {
                pending: HashMap::new(),
                retired: HashSet::new(),
                retired_order: VecDeque::new(),
                retired_capacity: retired_capacity.max(1),
            })),
        }
    }

    /// Start tracking an action.
    ///
    /// Returns `false` (and changes nothing) if the id is already pending or
    /// has already reached a terminal state.
    pub fn track(&self, action: PendingAction) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending.contains_key(&action.action_id) || inner.retired.contains(&action.action_id) {
            return false;
        }
        debug!("tracking {} {} until block {}", action.kind, action.action_id, action.deadline);
        inner.pending.insert(action.action_id.clone(), action);
        true
    }

    /// Remove and return every action whose deadline is strictly below `height`
    pub fn expire_at_height(&self, height: Height) -> Vec<PendingAction> {
        let mut inner = self.inner.lock();
        let expired_ids: Vec<ActionId> = inner
            .pending
            .values()
            .filter(|a| a.is_expired_at(height))
            .map(|a| a.action_id.clone())
            .collect();

        let mut expired: Vec<PendingAction> = expired_ids.iter().filter_map(|id| inner.take(id)).collect();
        expired.sort_by_key(|a| a.deadline);
        expired
    }

    /// Remove on a successful receipt; `None` if another path got there first
    pub fn confirm(&self, id: &ActionId) -> Option<PendingAction> {
        self.inner.lock().take(id)
    }

    /// Remove on a reverted receipt; same tie-break as `confirm`
    pub fn fail(&self, id: &ActionId) -> Option<PendingAction> {
        self.inner.lock().take(id)
    }

    /// Forget an action without a terminal signal (it still cannot be re-tracked)
    pub fn discard(&self, id: &ActionId) -> Option<PendingAction> {
        self.inner.lock().take(id)
    }

    pub fn get(&self, id: &ActionId) -> Option<PendingAction> {
        self.inner.lock().pending.get(id).cloned()
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.inner.lock().pending.contains_key(id)
    }

    /// Whether `id` has been confirmed, expired, failed or discarded
    pub fn is_retired(&self, id: &ActionId) -> bool {
        self.inner.lock().retired.contains(id)
    }

    pub fn pending(&self) -> Vec<PendingAction> {
        self.inner.lock().pending.values().cloned().collect()
    }

    pub fn pending_ids(&self) -> HashSet<ActionId> {
        self.inner.lock().pending.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }
}

impl Default for ActionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agar_types::ActionKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn action(id: &str, deadline: Height) -> PendingAction {
        PendingAction::new(ActionId::new(id), ActionKind::Move, deadline)
    }

    #[test]
    fn test_track_is_idempotent() {
        let tracker = ActionTracker::new();
        assert!(tracker.track(action("0x01", 10)));
        assert!(!tracker.track(action("0x01", 99)));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(&ActionId::new("0x01")).unwrap().deadline, 10);
    }

    #[test]
    fn test_deadline_boundary() {
        let tracker = ActionTracker::new();
        tracker.track(action("0x02", 1000));
        assert!(tracker.expire_at_height(1000).is_empty());
        let expired = tracker.expire_at_height(1001);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].action_id, ActionId::new("0x02"));
    }

    #[test]
    fn test_expiry_scenario() {
        let tracker = ActionTracker::new();
        tracker.track(action("0x03", 1000));
        let mut signals = 0;
        for height in 990..=1001 {
            signals += tracker.expire_at_height(height).len();
        }
        assert_eq!(signals, 1);
        assert!(tracker.is_empty());
        assert!(tracker.expire_at_height(1002).is_empty());
    }

    #[test]
    fn test_removed_ids_never_reappear() {
        let tracker = ActionTracker::new();
        let id = ActionId::new("0x04");
        tracker.track(action("0x04", 5));
        assert!(tracker.confirm(&id).is_some());
        assert!(tracker.confirm(&id).is_none());
        assert!(!tracker.track(action("0x04", 50)));
        assert!(tracker.is_retired(&id));
    }

    #[test]
    fn test_retired_set_is_bounded() {
        let tracker = ActionTracker::with_retired_capacity(2);
        for id in ["0x10", "0x11", "0x12"] {
            tracker.track(action(id, 1));
            tracker.discard(&ActionId::new(id));
        }
        assert!(!tracker.is_retired(&ActionId::new("0x10")));
        assert!(tracker.is_retired(&ActionId::new("0x12")));
    }

    #[test]
    fn test_confirm_expire_race_single_winner() {
        for _ in 0..200 {
            let tracker = ActionTracker::new();
            let id = ActionId::new("0x05");
            tracker.track(action("0x05", 10));
            let wins = Arc::new(AtomicUsize::new(0));

            let confirmer = {
                let (tracker, id, wins) = (tracker.clone(), id.clone(), wins.clone());
                std::thread::spawn(move || {
                    if tracker.confirm(&id).is_some() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            };
            let expirer = {
                let (tracker, wins) = (tracker.clone(), wins.clone());
                std::thread::spawn(move || {
                    wins.fetch_add(tracker.expire_at_height(11).len(), Ordering::SeqCst);
                })
            };
            confirmer.join().unwrap();
            expirer.join().unwrap();
            assert_eq!(wins.load(Ordering::SeqCst), 1);
        }
    }
}
