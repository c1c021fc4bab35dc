//! Protocol error types.

use thiserror::Error;

/// Errors that can occur during protocol parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet opcode: {0:#04x}")]
    InvalidOpcode(u8),

    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("Empty packet")]
    EmptyPacket,

    #[error("Invalid command bits: {0:#04x}")]
    InvalidCommand(u8),

    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),
}
