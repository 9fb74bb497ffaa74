//! Optimistic projector
//!
//! Holds the local participant's queued moves and derives where the
//! participant will be once they confirm. Pure: no I/O, no clock. The same
//! confirmed record, queue and constants always give the same projection.

use agar_types::{rules, ActionId, Direction, GameConstants, Participant, Position};
use std::collections::HashSet;

/// A move submitted locally and not yet resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedMove {
    pub provisional: ActionId,
    /// Real identifier once submission returned one
    pub action_id: Option<ActionId>,
    pub direction: Direction,
}

impl QueuedMove {
    fn is_known_upstream(&self, upstream: &HashSet<ActionId>) -> bool {
        upstream.contains(&self.provisional)
            || self.action_id.as_ref().is_some_and(|id| upstream.contains(id))
    }
}

#[derive(Debug, Default)]
pub struct OptimisticProjector {
    queue: Vec<QueuedMove>,
    next_seq: u64,
}

impl OptimisticProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a move and return its provisional identifier
    pub fn enqueue(&mut self, direction: Direction) -> ActionId {
        self.next_seq += 1;
        let provisional = ActionId::provisional(self.next_seq, Some(direction));
        self.queue.push(QueuedMove {
            provisional: provisional.clone(),
            action_id: None,
            direction,
        });
        provisional
    }

    /// Record the real identifier of a queued move
    pub fn bind(&mut self, provisional: &ActionId, real: ActionId) -> bool {
        match self.queue.iter_mut().find(|m| &m.provisional == provisional) {
            Some(queued) => {
                queued.action_id = Some(real);
                true
            }
            None => false,
        }
    }

    /// Keep only moves still pending upstream. Returns `true` if any were dropped.
    pub fn reconcile(&mut self, upstream: &HashSet<ActionId>) -> bool {
        let before = self.queue.len();
        self.queue.retain(|m| m.is_known_upstream(upstream));
        self.queue.len() != before
    }

    /// Forget every queued move
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn queue(&self) -> &[QueuedMove] {
        &self.queue
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Predicted position after every queued move, `None` without a confirmed record
    pub fn projected(&self, confirmed: Option<&Participant>, constants: &GameConstants) -> Option<Position> {
        let confirmed = confirmed?;
        Some(rules::project(
            confirmed.position(),
            confirmed.value,
            self.directions(),
            constants,
        ))
    }

    /// Predicted position after each queued move, in queue order
    pub fn previews(&self, confirmed: Option<&Participant>, constants: &GameConstants) -> Vec<Position> {
        match confirmed {
            Some(p) => rules::project_steps(p.position(), p.value, self.directions(), constants),
            None => Vec::new(),
        }
    }

    fn directions(&self) -> impl Iterator<Item = Direction> + '_ {
        self.queue.iter().map(|m| m.direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agar_types::Address;

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

    fn participant(x: u64, y: u64, value: u128) -> Participant {
        Participant::new(Address::from_bytes([1; 20]), value, Position::new(x, y))
    }

    #[test]
    fn test_projection_is_deterministic() {
        let c = constants();
        let confirmed = participant(100, 100, 600);
        let mut projector = OptimisticProjector::new();
        for d in [Direction::Up, Direction::Right, Direction::Right, Direction::Down] {
            projector.enqueue(d);
        }

        let first = projector.projected(Some(&confirmed), &c);
        let second = projector.projected(Some(&confirmed), &c);
        assert_eq!(first, second);
        // velocity(600) = 30
        assert_eq!(first, Some(Position::new(160, 100)));
        assert_eq!(
            projector.previews(Some(&confirmed), &c),
            vec![
                Position::new(100, 70),
                Position::new(130, 70),
                Position::new(160, 70),
                Position::new(160, 100),
            ]
        );
    }

    #[test]
    fn test_no_confirmed_record_means_no_projection() {
        let mut projector = OptimisticProjector::new();
        projector.enqueue(Direction::Left);
        assert_eq!(projector.projected(None, &constants()), None);
        assert!(projector.previews(None, &constants()).is_empty());
    }

    #[test]
    fn test_reconcile_keeps_moves_known_upstream() {
        let mut projector = OptimisticProjector::new();
        let a = projector.enqueue(Direction::Up);
        let b = projector.enqueue(Direction::Down);
        let c = projector.enqueue(Direction::Left);
        assert!(projector.bind(&b, ActionId::new("0xbb")));

        // `a` by provisional id, `b` by real id, `c` is gone
        let upstream: HashSet<ActionId> = [a.clone(), ActionId::new("0xbb")].into_iter().collect();
        assert!(projector.reconcile(&upstream));
        let left: Vec<&ActionId> = projector.queue().iter().map(|m| &m.provisional).collect();
        assert_eq!(left, vec![&a, &b]);
        assert!(!projector.queue().iter().any(|m| m.provisional == c));

        assert!(!projector.reconcile(&upstream));
        assert!(projector.reconcile(&HashSet::new()));
        assert!(projector.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut projector = OptimisticProjector::new();
        projector.enqueue(Direction::Up);
        projector.enqueue(Direction::Up);
        projector.clear();
        assert!(projector.is_empty());
        assert_eq!(
            projector.projected(Some(&participant(5, 5, 600)), &constants()),
            Some(Position::new(5, 5))
        );
    }
}
