//! Client -> Server packets.

use bytes::Bytes;

use super::ClientOpcode;
use crate::{BinaryReader, BinaryWriter, InputSeq, MoveCommand, ProtocolError};

/// Parsed client packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientPacket {
    /// Input (0x10).
    Input { input_seq: InputSeq, command: MoveCommand },
    /// Ping (0xFE).
    Ping { client_time_ms: f64 },
}

impl ClientPacket {
    /// Parse a client packet from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::EmptyPacket);
        }

        let mut reader = BinaryReader::new(data.to_vec());
        let opcode = reader.get_u8()?;

        let packet = match opcode {
            0x10 => {
                let input_seq = reader.get_u32()?;
                let command = MoveCommand::from_bits(reader.get_u8()?)?;
                ClientPacket::Input { input_seq, command }
            }
            0xFE => ClientPacket::Ping {
                client_time_ms: reader.get_f64()?,
            },
            _ => return Err(ProtocolError::InvalidOpcode(opcode)),
        };
        reader.finish()?;
        Ok(packet)
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = BinaryWriter::with_capacity(9);
        match *self {
            ClientPacket::Input { input_seq, command } => {
                writer.put_u8(ClientOpcode::Input as u8);
                writer.put_u32(input_seq);
                writer.put_u8(command.to_bits());
            }
            ClientPacket::Ping { client_time_ms } => {
                writer.put_u8(ClientOpcode::Ping as u8);
                writer.put_f64(client_time_ms);
            }
        }
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_frame_layout() {
        let bytes = ClientPacket::Input {
            input_seq: 7,
            command: MoveCommand::right(),
        }
        .encode();
        assert_eq!(&bytes[..], &[0x10, 7, 0, 0, 0, 0x08]);
    }

    #[test]
    fn test_rejects_unknown_opcode() {
        assert_eq!(
            ClientPacket::parse(&[0x42]),
            Err(ProtocolError::InvalidOpcode(0x42))
        );
        assert_eq!(ClientPacket::parse(&[]), Err(ProtocolError::EmptyPacket));
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(
            ClientPacket::parse(&[0x10, 1, 0]),
            Err(ProtocolError::UnexpectedEof)
        );
    }
}
