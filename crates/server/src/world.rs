//! Authoritative world state.
//!
//! Players move by the shared [`MovementRules`], except that the server also
//! knows about solid blocks: a step that would end inside one is rejected. The
//! client cannot predict that, which is what makes reconciliation necessary.

use glam::Vec2;
use protocol::packets::{ClientPacket, EntityRecord, ServerPacket, SnapshotPacket};
use protocol::{EntityId, InputSeq, MoveCommand, MovementRules, Position, Tick};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::{debug, info};

use crate::bot::Bot;
use crate::config::Config;

/// Attempts at finding a spawn point outside every block.
const SPAWN_ATTEMPTS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
}

/// Solid axis-aligned obstacle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block {
    pub min: Vec2,
    pub max: Vec2,
}

impl Block {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Square block of side `size` centred on `center`.
    pub fn square(center: Vec2, size: f32) -> Self {
        let half = Vec2::splat(size / 2.0);
        Self::new(center - half, center + half)
    }

    #[inline]
    pub fn contains(&self, p: Position) -> bool {
        p.cmpgt(self.min).all() && p.cmplt(self.max).all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bomb {
    pub owner: EntityId,
    pub position: Position,
    /// Ticks until detonation.
    pub fuse: u32,
}

#[derive(Debug)]
pub struct Player {
    pub id: EntityId,
    pub position: Position,
    pub alive: bool,
    pub is_bot: bool,
    /// Inputs received but not yet simulated, in sequence order.
    pending: VecDeque<(InputSeq, MoveCommand)>,
    last_queued_seq: Option<InputSeq>,
    /// Highest input sequence the simulation has applied.
    pub last_processed_seq: Option<InputSeq>,
    respawn_in: u32,
    bomb_cooldown: u32,
}

impl Player {
    fn new(id: EntityId, position: Position, is_bot: bool) -> Self {
        Self {
            id,
            position,
            alive: true,
            is_bot,
            pending: VecDeque::new(),
            last_queued_seq: None,
            last_processed_seq: None,
            respawn_in: 0,
            bomb_cooldown: 0,
        }
    }

    pub fn pending_inputs(&self) -> usize {
        self.pending.len()
    }
}

/// The game world.
#[derive(Debug)]
pub struct World {
    config: Config,
    rules: MovementRules,
    rng: StdRng,

    tick: Tick,
    time_ms: f64,
    next_entity_id: EntityId,

    players: BTreeMap<EntityId, Player>,
    bots: Vec<Bot>,
    blocks: Vec<Block>,
    bombs: Vec<Bomb>,
}

impl World {
    /// Create a world, scatter blocks and spawn the configured bots.
    pub fn new(config: Config) -> Self {
        let seed = config.server.seed.unwrap_or_else(rand::random);
        let mut world = Self {
            rules: config.movement(),
            rng: StdRng::seed_from_u64(seed),
            config,
            tick: 0,
            time_ms: 0.0,
            next_entity_id: 1,
            players: BTreeMap::new(),
            bots: Vec::new(),
            blocks: Vec::new(),
            bombs: Vec::new(),
        };

        for _ in 0..world.config.arena.blocks {
            let center = world.random_position();
            let block = Block::square(center, world.config.arena.block_size);
            world.blocks.push(block);
        }
        for _ in 0..world.config.server.bots {
            let id = world.spawn_player(true, None);
            world.bots.push(Bot::new(id));
        }
        info!(
            "World initialized: {} blocks, {} bots (seed {})",
            world.blocks.len(),
            world.bots.len(),
            seed
        );
        world
    }

    fn random_position(&mut self) -> Position {
        let arena = self.rules.arena;
        Vec2::new(
            self.rng.random_range(arena.min.x..=arena.max.x),
            self.rng.random_range(arena.min.y..=arena.max.y),
        )
    }

    fn is_blocked(&self, p: Position) -> bool {
        self.blocks.iter().any(|b| b.contains(p))
    }

    fn spawn_point(&mut self) -> Position {
        for _ in 0..SPAWN_ATTEMPTS {
            let p = self.random_position();
            if !self.is_blocked(p) {
                return p;
            }
        }
        (self.rules.arena.min + self.rules.arena.max) / 2.0
    }

    fn spawn_player(&mut self, is_bot: bool, at: Option<Position>) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        let position = match at {
            Some(p) => self.rules.arena.clamp(p),
            None => self.spawn_point(),
        };
        self.players.insert(id, Player::new(id, position, is_bot));
        debug!("Spawned {} {} at {}", if is_bot { "bot" } else { "player" }, id, position);
        id
    }

    /// Add a remote player at a random spawn point.
    pub fn join(&mut self) -> EntityId {
        let id = self.spawn_player(false, None);
        info!("Player {} joined", id);
        id
    }

    /// Add a remote player at a fixed position.
    pub fn join_at(&mut self, position: Position) -> EntityId {
        let id = self.spawn_player(false, Some(position));
        info!("Player {} joined at {}", id, position);
        id
    }

    pub fn leave(&mut self, id: EntityId) {
        if self.players.remove(&id).is_some() {
            info!("Player {} left", id);
        }
        self.bots.retain(|b| b.id != id);
    }

    pub fn add_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Queue an input for the next tick. Duplicates and out-of-order inputs
    /// are dropped.
    pub fn queue_input(
        &mut self,
        id: EntityId,
        input_seq: InputSeq,
        command: MoveCommand,
    ) -> Result<(), WorldError> {
        let player = self
            .players
            .get_mut(&id)
            .ok_or(WorldError::UnknownEntity(id))?;
        if player.last_queued_seq.is_some_and(|last| input_seq <= last) {
            debug!("Player {} sent stale input {}", id, input_seq);
            return Ok(());
        }
        player.last_queued_seq = Some(input_seq);
        player.pending.push_back((input_seq, command));
        Ok(())
    }

    /// Handle one decoded client frame. Returns an immediate reply, if any.
    pub fn handle_client_packet(
        &mut self,
        id: EntityId,
        packet: &ClientPacket,
    ) -> Result<Option<ServerPacket>, WorldError> {
        match *packet {
            ClientPacket::Input { input_seq, command } => {
                self.queue_input(id, input_seq, command)?;
                Ok(None)
            }
            ClientPacket::Ping { client_time_ms } => {
                Ok(Some(ServerPacket::Pong { client_time_ms }))
            }
        }
    }

    /// Advance the simulation by one tick and build a snapshot frame for every
    /// non-bot player.
    pub fn step(&mut self) -> Vec<(EntityId, ServerPacket)> {
        self.tick += 1;
        self.time_ms += self.config.server.tick_interval_ms as f64;

        let bot_inputs: Vec<(EntityId, InputSeq, MoveCommand)> = self
            .bots
            .iter_mut()
            .map(|bot| {
                let (seq, command) = bot.next_input(&mut self.rng);
                (bot.id, seq, command)
            })
            .collect();
        for (id, seq, command) in bot_inputs {
            // Bot ids always exist.
            let _ = self.queue_input(id, seq, command);
        }

        self.simulate_players();
        self.detonate_bombs();
        self.snapshots()
    }

    fn simulate_players(&mut self) {
        let ids: Vec<EntityId> = self.players.keys().copied().collect();
        for id in ids {
            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            player.bomb_cooldown = player.bomb_cooldown.saturating_sub(1);

            if !player.alive {
                player.pending.clear();
                player.respawn_in = player.respawn_in.saturating_sub(1);
                if player.respawn_in == 0 {
                    let position = self.spawn_point();
                    if let Some(player) = self.players.get_mut(&id) {
                        player.position = position;
                        player.alive = true;
                        debug!("Player {} respawned at {}", id, position);
                    }
                }
                continue;
            }

            let inputs: Vec<(InputSeq, MoveCommand)> = player.pending.drain(..).collect();
            for (seq, command) in inputs {
                self.apply_input(id, seq, command);
            }
        }
    }

    fn apply_input(&mut self, id: EntityId, seq: InputSeq, command: MoveCommand) {
        let Some(current) = self.players.get(&id).map(|p| p.position) else {
            return;
        };
        let next = self.rules.step(current, command);
        let blocked = self.is_blocked(next);
        let fuse = self.config.bomb.fuse_ticks;
        let cooldown = self.config.bomb.cooldown_ticks;

        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        if !blocked {
            player.position = next;
        }
        player.last_processed_seq = Some(seq);

        if command.place_bomb && player.bomb_cooldown == 0 {
            player.bomb_cooldown = cooldown;
            self.bombs.push(Bomb {
                owner: id,
                position: player.position,
                fuse,
            });
            debug!("Player {} placed a bomb at {}", id, player.position);
        }
    }

    fn detonate_bombs(&mut self) {
        let radius = self.config.bomb.blast_radius;
        let respawn_ticks = self.config.bomb.respawn_ticks.max(1);

        let mut detonated = Vec::new();
        self.bombs.retain_mut(|bomb| {
            bomb.fuse = bomb.fuse.saturating_sub(1);
            if bomb.fuse == 0 {
                detonated.push(*bomb);
                false
            } else {
                true
            }
        });

        for bomb in detonated {
            for player in self.players.values_mut() {
                if player.alive && player.position.distance(bomb.position) <= radius {
                    player.alive = false;
                    player.respawn_in = respawn_ticks;
                    player.pending.clear();
                    info!(
                        "Player {} eliminated by bomb of {} at tick {}",
                        player.id, bomb.owner, self.tick
                    );
                }
            }
        }
    }

    fn entity_records(&self) -> Vec<EntityRecord> {
        self.players
            .values()
            .filter(|p| p.alive)
            .map(|p| EntityRecord {
                id: p.id,
                position: p.position,
            })
            .collect()
    }

    fn snapshots(&self) -> Vec<(EntityId, ServerPacket)> {
        let entities = self.entity_records();
        self.players
            .values()
            .filter(|p| !p.is_bot)
            .map(|p| {
                let packet = ServerPacket::Snapshot(SnapshotPacket {
                    tick: self.tick,
                    server_time_ms: self.time_ms,
                    last_input_seq: p.last_processed_seq,
                    entities: entities.clone(),
                });
                (p.id, packet)
            })
            .collect()
    }

    /// Snapshot of the current tick for one player.
    pub fn snapshot_for(&self, id: EntityId) -> Option<ServerPacket> {
        let player = self.players.get(&id)?;
        Some(ServerPacket::Snapshot(SnapshotPacket {
            tick: self.tick,
            server_time_ms: self.time_ms,
            last_input_seq: player.last_processed_seq,
            entities: self.entity_records(),
        }))
    }

    /// Restart the match: bombs cleared, everyone respawned. Returns a
    /// `ClearAll` frame for every connected player.
    pub fn reset_match(&mut self) -> Vec<(EntityId, ServerPacket)> {
        self.bombs.clear();
        let ids: Vec<EntityId> = self.players.keys().copied().collect();
        for id in ids {
            let position = self.spawn_point();
            if let Some(player) = self.players.get_mut(&id) {
                player.position = position;
                player.alive = true;
                player.respawn_in = 0;
                player.pending.clear();
            }
        }
        info!("Match reset at tick {}", self.tick);
        self.players
            .values()
            .filter(|p| !p.is_bot)
            .map(|p| (p.id, ServerPacket::ClearAll))
            .collect()
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn time_ms(&self) -> f64 {
        self.time_ms
    }

    pub fn rules(&self) -> MovementRules {
        self.rules
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn player(&self, id: EntityId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn bombs(&self) -> &[Bomb] {
        &self.bombs
    }
}
