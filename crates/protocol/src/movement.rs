//! Deterministic movement rule.
//!
//! The server applies exactly this step for every input it processes, and the
//! client replays it during prediction. Anything the client cannot know about
//! (blocks, other players) is resolved on the server only.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::{Position, ProtocolError};

const BIT_UP: u8 = 0x01;
const BIT_DOWN: u8 = 0x02;
const BIT_LEFT: u8 = 0x04;
const BIT_RIGHT: u8 = 0x08;
const BIT_BOMB: u8 = 0x10;
const ALL_BITS: u8 = BIT_UP | BIT_DOWN | BIT_LEFT | BIT_RIGHT | BIT_BOMB;

/// One frame of player intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MoveCommand {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub place_bomb: bool,
}

impl MoveCommand {
    pub const IDLE: Self = Self {
        up: false,
        down: false,
        left: false,
        right: false,
        place_bomb: false,
    };

    pub const fn right() -> Self {
        Self { right: true, ..Self::IDLE }
    }

    pub const fn left() -> Self {
        Self { left: true, ..Self::IDLE }
    }

    pub const fn up() -> Self {
        Self { up: true, ..Self::IDLE }
    }

    pub const fn down() -> Self {
        Self { down: true, ..Self::IDLE }
    }

    pub fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.up {
            bits |= BIT_UP;
        }
        if self.down {
            bits |= BIT_DOWN;
        }
        if self.left {
            bits |= BIT_LEFT;
        }
        if self.right {
            bits |= BIT_RIGHT;
        }
        if self.place_bomb {
            bits |= BIT_BOMB;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Result<Self, ProtocolError> {
        if bits & !ALL_BITS != 0 {
            return Err(ProtocolError::InvalidCommand(bits));
        }
        Ok(Self {
            up: bits & BIT_UP != 0,
            down: bits & BIT_DOWN != 0,
            left: bits & BIT_LEFT != 0,
            right: bits & BIT_RIGHT != 0,
            place_bomb: bits & BIT_BOMB != 0,
        })
    }

    /// Unit direction of travel (screen space, +y is down). Opposite keys cancel.
    pub fn direction(self) -> Vec2 {
        let x = self.right as i8 - self.left as i8;
        let y = self.down as i8 - self.up as i8;
        Vec2::new(x as f32, y as f32).normalize_or_zero()
    }
}

/// Axis-aligned playfield bounds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Arena {
    pub min: Vec2,
    pub max: Vec2,
}

impl Arena {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn clamp(&self, p: Position) -> Position {
        p.clamp(self.min, self.max)
    }

    pub fn contains(&self, p: Position) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            min: Vec2::ZERO,
            max: Vec2::splat(1000.0),
        }
    }
}

/// The movement step function.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MovementRules {
    /// Distance travelled per applied input.
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub arena: Arena,
}

impl Default for MovementRules {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            arena: Arena::default(),
        }
    }
}

fn default_speed() -> f32 {
    4.0
}

impl MovementRules {
    /// Apply one input to `position`.
    #[inline]
    pub fn step(&self, position: Position, command: MoveCommand) -> Position {
        self.arena.clamp(position + command.direction() * self.speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bits() {
        let cmd = MoveCommand {
            up: true,
            right: true,
            place_bomb: true,
            ..MoveCommand::IDLE
        };
        assert_eq!(MoveCommand::from_bits(cmd.to_bits()), Ok(cmd));
        assert_eq!(
            MoveCommand::from_bits(0x80),
            Err(ProtocolError::InvalidCommand(0x80))
        );
    }

    #[test]
    fn test_opposite_keys_cancel() {
        let cmd = MoveCommand {
            left: true,
            right: true,
            ..MoveCommand::IDLE
        };
        assert_eq!(cmd.direction(), Vec2::ZERO);
    }

    #[test]
    fn test_step_clamps_to_arena() {
        let rules = MovementRules {
            speed: 10.0,
            arena: Arena::new(Vec2::ZERO, Vec2::new(15.0, 15.0)),
        };
        let p = rules.step(Vec2::new(10.0, 5.0), MoveCommand::right());
        assert_eq!(p, Vec2::new(15.0, 5.0));
        let p = rules.step(Vec2::new(3.0, 5.0), MoveCommand::left());
        assert_eq!(p, Vec2::new(0.0, 5.0));
    }

    #[test]
    fn test_diagonal_keeps_speed() {
        let rules = MovementRules::default();
        let cmd = MoveCommand {
            down: true,
            right: true,
            ..MoveCommand::IDLE
        };
        let p = rules.step(Vec2::splat(100.0), cmd);
        assert!((p.distance(Vec2::splat(100.0)) - rules.speed).abs() < 1e-4);
    }
}
