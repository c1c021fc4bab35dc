//! Server configuration.

use protocol::{Arena, MovementRules};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub arena: ArenaConfig,
    #[serde(default)]
    pub bomb: BombConfig,
}

impl Config {
    /// Load configuration from `path`, writing the defaults there if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }

    /// The movement step the server applies to every input.
    pub fn movement(&self) -> MovementRules {
        MovementRules {
            speed: self.arena.speed,
            arena: Arena::new(
                glam::Vec2::ZERO,
                glam::Vec2::new(self.arena.width, self.arena.height),
            ),
        }
    }
}

/// Simulation scheduling.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Tick interval in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Number of wandering bots.
    #[serde(default = "default_bots")]
    pub bots: usize,
    /// Seed for spawn points, blocks and bot decisions. Random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            bots: default_bots(),
            seed: None,
        }
    }
}

fn default_tick_interval() -> u64 {
    50
}
fn default_bots() -> usize {
    3
}

/// Playfield.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ArenaConfig {
    #[serde(default = "default_arena_size")]
    pub width: f32,
    #[serde(default = "default_arena_size")]
    pub height: f32,
    /// Distance moved per processed input.
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Solid blocks scattered at startup. Clients do not know about them.
    #[serde(default = "default_block_count")]
    pub blocks: usize,
    #[serde(default = "default_block_size")]
    pub block_size: f32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: default_arena_size(),
            height: default_arena_size(),
            speed: default_speed(),
            blocks: default_block_count(),
            block_size: default_block_size(),
        }
    }
}

fn default_arena_size() -> f32 {
    1000.0
}
fn default_speed() -> f32 {
    4.0
}
fn default_block_count() -> usize {
    12
}
fn default_block_size() -> f32 {
    40.0
}

/// Bomb and respawn rules.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BombConfig {
    /// Ticks between placement and detonation.
    #[serde(default = "default_fuse_ticks")]
    pub fuse_ticks: u32,
    /// Players within this distance of a detonation are eliminated.
    #[serde(default = "default_blast_radius")]
    pub blast_radius: f32,
    /// Minimum ticks between two bombs of the same player.
    #[serde(default = "default_bomb_cooldown")]
    pub cooldown_ticks: u32,
    /// Ticks an eliminated player stays out before respawning.
    #[serde(default = "default_respawn_ticks")]
    pub respawn_ticks: u32,
}

impl Default for BombConfig {
    fn default() -> Self {
        Self {
            fuse_ticks: default_fuse_ticks(),
            blast_radius: default_blast_radius(),
            cooldown_ticks: default_bomb_cooldown(),
            respawn_ticks: default_respawn_ticks(),
        }
    }
}

fn default_fuse_ticks() -> u32 {
    40
}
fn default_blast_radius() -> f32 {
    60.0
}
fn default_bomb_cooldown() -> u32 {
    20
}
fn default_respawn_ticks() -> u32 {
    60
}
