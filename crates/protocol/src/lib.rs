//! Shared protocol crate for the arena netcode.
//!
//! This crate contains:
//! - Binary reading/writing utilities
//! - Packet definitions and codecs
//! - The deterministic movement rule shared by server and client prediction
//! - Shared types (Position, EntityId, etc.)

mod binary;
mod error;
pub mod movement;
pub mod packets;

pub use binary::{BinaryReader, BinaryWriter};
pub use error::ProtocolError;
pub use movement::{Arena, MoveCommand, MovementRules};

/// Represents a 2D position using glam's Vec2.
pub type Position = glam::Vec2;

/// Server-assigned entity identifier.
pub type EntityId = u32;

/// Server simulation step.
pub type Tick = u64;

/// Client-assigned input sequence number.
pub type InputSeq = u32;
