//! Wandering bots that keep the arena populated.

use protocol::{EntityId, InputSeq, MoveCommand};
use rand::Rng;

const DIRECTIONS: [MoveCommand; 5] = [
    MoveCommand::IDLE,
    MoveCommand::up(),
    MoveCommand::down(),
    MoveCommand::left(),
    MoveCommand::right(),
];

/// A bot player driven by the server itself.
#[derive(Debug)]
pub struct Bot {
    /// Entity this bot controls.
    pub id: EntityId,
    next_seq: InputSeq,
    command: MoveCommand,
    /// Ticks until the next change of direction.
    decision_cooldown: u32,
}

impl Bot {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            next_seq: 1,
            command: MoveCommand::IDLE,
            decision_cooldown: 0,
        }
    }

    /// Produce this tick's input. Bots keep a heading for a while, then pick a
    /// new one; now and then they drop a bomb.
    pub fn next_input<R: Rng + ?Sized>(&mut self, rng: &mut R) -> (InputSeq, MoveCommand) {
        if self.decision_cooldown == 0 {
            self.command = DIRECTIONS[rng.random_range(0..DIRECTIONS.len())];
            self.decision_cooldown = rng.random_range(5..30);
        } else {
            self.decision_cooldown -= 1;
        }

        let mut command = self.command;
        command.place_bomb = rng.random_bool(0.02);

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        (seq, command)
    }
}
