//! Headless authoritative arena server.
//!
//! Owns the simulation the client-side netcode is measured against: players,
//! blocks the clients do not know about, and bombs that eliminate players.

pub mod bot;
pub mod config;
pub mod game_loop;
pub mod world;

// Re-export commonly used types
pub use config::Config;
pub use game_loop::{TickOutput, run_tick_loop};
pub use world::{Block, Bomb, Player, World, WorldError};
