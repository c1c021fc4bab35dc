//! Packet definitions for the arena protocol.
//!
//! This module contains both client->server and server->client packet types.
//! Every frame starts with a one-byte opcode.

mod client;
mod server;

pub use client::*;
pub use server::*;

/// Opcodes for client -> server packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    /// Movement/bomb input with sequence number.
    Input = 0x10,
    /// Ping carrying the client's send timestamp.
    Ping = 0xFE,
}

/// Opcodes for server -> client packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOpcode {
    /// World snapshot for one tick.
    Snapshot = 0x10,
    /// Standalone input acknowledgement.
    InputAck = 0x11,
    /// Clear all state (match restart / room change).
    ClearAll = 0x12,
    /// Tells the client which entity it controls.
    AssignEntity = 0x20,
    /// Ping response echoing the client timestamp.
    Pong = 0xFE,
}
