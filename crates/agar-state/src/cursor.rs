//! Latest known chain height

use agar_types::{ActionKind, Height};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonically non-decreasing block height shared across tasks
#[derive(Clone, Default)]
pub struct BlockCursor {
    height: Arc<AtomicU64>,
    updated_at: Arc<Mutex<Option<Instant>>>,
}

impl BlockCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed height. Returns `true` if the cursor moved forward.
    ///
    /// Any observation, even a stale one, refreshes the liveness timestamp.
    pub fn advance(&self, height: Height) -> bool {
        let previous = self.height.fetch_max(height, Ordering::AcqRel);
        *self.updated_at.lock() = Some(Instant::now());
        height > previous
    }

    pub fn get(&self) -> Height {
        self.height.load(Ordering::Acquire)
    }

    /// Time since the last observation, `None` before the first one
    pub fn since_last_update(&self) -> Option<Duration> {
        self.updated_at.lock().map(|t| t.elapsed())
    }

    /// Deadline for an action submitted now
    pub fn deadline_for(&self, kind: ActionKind) -> Height {
        self.get() + kind.deadline_offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_moves_backwards() {
        let cursor = BlockCursor::new();
        assert!(cursor.since_last_update().is_none());
        assert!(cursor.advance(10));
        assert!(!cursor.advance(7));
        assert!(!cursor.advance(10));
        assert_eq!(cursor.get(), 10);
        assert!(cursor.since_last_update().is_some());
    }

    #[test]
    fn test_deadline_for() {
        let cursor = BlockCursor::new();
        cursor.advance(1000);
        assert_eq!(cursor.deadline_for(ActionKind::Move), 1020);
        assert_eq!(cursor.deadline_for(ActionKind::Leave), 1100);
    }
}
