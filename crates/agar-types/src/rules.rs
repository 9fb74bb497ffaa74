//! Movement rules mirroring the game contract
//!
//! Velocity falls linearly from `velocity_max` at `min_value` to
//! `velocity_min` at `max_value`. Each step is clamped to the board.

use crate::{Amount, Direction, GameConstants, Position};

/// Distance covered by one move for a participant holding `value`
pub fn velocity(value: Amount, constants: &GameConstants) -> u64 {
    let vmin = constants.velocity_min;
    let vmax = constants.velocity_max;
    let min = constants.min_value;
    let max = constants.max_value;

    if value <= min {
        return vmax;
    }
    if max == 0 || value >= max {
        return vmin;
    }
    if max <= min {
        return vmin;
    }

    let span = u128::from(vmax.saturating_sub(vmin));
    let reduction = (value - min).saturating_mul(span) / (max - min);
    // reduction <= span <= u64::MAX
    vmax.saturating_sub(reduction as u64)
}

/// Apply one move of length `velocity` from `from`, clamped to the board
pub fn step(from: Position, direction: Direction, velocity: u64, constants: &GameConstants) -> Position {
    let Position { x, y } = from;
    match direction {
        Direction::Up => Position::new(x, y.saturating_sub(velocity)),
        Direction::Down => Position::new(x, y.saturating_add(velocity).min(constants.board_height)),
        Direction::Left => Position::new(x.saturating_sub(velocity), y),
        Direction::Right => Position::new(x.saturating_add(velocity).min(constants.board_width), y),
    }
}

/// Every intermediate position produced by applying `moves` in order.
///
/// The value is held constant across the queue: fees are only reflected
/// once the contract confirms them.
pub fn project_steps(
    start: Position,
    value: Amount,
    moves: impl IntoIterator<Item = Direction>,
    constants: &GameConstants,
) -> Vec<Position> {
    let v = velocity(value, constants);
    let mut current = start;
    moves
        .into_iter()
        .map(|direction| {
            current = step(current, direction, v, constants);
            current
        })
        .collect()
}

/// Final position after applying `moves` in order
pub fn project(
    start: Position,
    value: Amount,
    moves: impl IntoIterator<Item = Direction>,
    constants: &GameConstants,
) -> Position {
    project_steps(start, value, moves, constants)
        .last()
        .copied()
        .unwrap_or(start)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_velocity_bounds_and_interpolation() {
        let c = constants();
        assert_eq!(velocity(0, &c), 50);
        assert_eq!(velocity(100, &c), 50);
        assert_eq!(velocity(600, &c), 30);
        assert_eq!(velocity(1100, &c), 10);
        assert_eq!(velocity(u128::MAX, &c), 10);
    }

    #[test]
    fn test_velocity_degenerate_range() {
        let mut c = constants();
        c.max_value = 0;
        assert_eq!(velocity(500, &c), 10);

        let mut c = constants();
        c.max_value = 100;
        assert_eq!(velocity(100, &c), 50);
        assert_eq!(velocity(101, &c), 10);
    }

    #[test]
    fn test_step_clamps_to_board() {
        let c = constants();
        assert_eq!(step(Position::new(5, 5), Direction::Up, 50, &c), Position::new(5, 0));
        assert_eq!(step(Position::new(5, 5), Direction::Left, 50, &c), Position::new(0, 5));
        assert_eq!(step(Position::new(990, 990), Direction::Down, 50, &c), Position::new(990, 1000));
        assert_eq!(step(Position::new(990, 990), Direction::Right, 50, &c), Position::new(1000, 990));
    }

    #[test]
    fn test_join_then_move_projection() {
        let c = constants();
        let start = Position::new(500, 500);
        let v = velocity(100, &c);
        assert_eq!(project(start, 100, [Direction::Up], &c), Position::new(500, 500 - v));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let c = constants();
        let moves = [Direction::Up, Direction::Right, Direction::Right, Direction::Down];
        let first = project_steps(Position::new(100, 100), 600, moves, &c);
        let second = project_steps(Position::new(100, 100), 600, moves, &c);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(*first.last().unwrap(), Position::new(160, 100));
    }

    #[test]
    fn test_empty_queue_is_identity() {
        let c = constants();
        let start = Position::new(7, 9);
        assert_eq!(project(start, 300, std::iter::empty(), &c), start);
    }
}
