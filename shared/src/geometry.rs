use serde::{Deserialize, Serialize};

use crate::{MAP_HEIGHT, MAP_WIDTH};

/// A point on the 2D map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn in_bounds(&self) -> bool {
        (0.0..=MAP_WIDTH).contains(&self.x) && (0.0..=MAP_HEIGHT).contains(&self.y)
    }

    pub fn clamped(&self) -> Position {
        Position {
            x: self.x.clamp(0.0, MAP_WIDTH),
            y: self.y.clamp(0.0, MAP_HEIGHT),
        }
    }

    /// Moves from `self` toward `target` by at most `max_distance`.
    ///
    /// Returns `target` itself when it is already within reach.
    pub fn step_toward(&self, target: &Position, max_distance: f32) -> Position {
        let distance = self.distance(target);
        if distance <= max_distance || distance < f32::EPSILON {
            return *target;
        }

        let scale = max_distance / distance;
        Position {
            x: self.x + (target.x - self.x) * scale,
            y: self.y + (target.y - self.y) * scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert_approx_eq!(a.distance(&b), 5.0, 0.0001);
    }

    #[test]
    fn test_bounds() {
        assert!(Position::new(0.0, 0.0).in_bounds());
        assert!(Position::new(MAP_WIDTH, MAP_HEIGHT).in_bounds());
        assert!(!Position::new(-0.5, 10.0).in_bounds());
        assert!(!Position::new(10.0, MAP_HEIGHT + 1.0).in_bounds());
    }

    #[test]
    fn test_non_finite() {
        assert!(!Position::new(f32::NAN, 1.0).is_finite());
        assert!(!Position::new(1.0, f32::INFINITY).is_finite());
        assert!(!Position::new(f32::NAN, 1.0).in_bounds());
    }

    #[test]
    fn test_clamped() {
        let p = Position::new(-20.0, MAP_HEIGHT + 20.0).clamped();
        assert_eq!(p, Position::new(0.0, MAP_HEIGHT));
    }

    #[test]
    fn test_step_toward_scales_down() {
        let from = Position::new(100.0, 100.0);
        let to = Position::new(200.0, 100.0);
        let stepped = from.step_toward(&to, 10.0);
        assert_approx_eq!(stepped.x, 110.0, 0.0001);
        assert_approx_eq!(stepped.y, 100.0, 0.0001);
    }

    #[test]
    fn test_step_toward_within_reach() {
        let from = Position::new(100.0, 100.0);
        let to = Position::new(103.0, 104.0);
        assert_eq!(from.step_toward(&to, 10.0), to);
    }
}
