//! Server -> Client packets.

use bytes::Bytes;

use super::ServerOpcode;
use crate::{BinaryReader, BinaryWriter, EntityId, InputSeq, Position, ProtocolError, Tick};

/// One entity position inside a snapshot frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub position: Position,
}

/// World snapshot for one server tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPacket {
    pub tick: Tick,
    pub server_time_ms: f64,
    /// Last input of the receiving client the server has processed.
    pub last_input_seq: Option<InputSeq>,
    pub entities: Vec<EntityRecord>,
}

/// Parsed server packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    /// Snapshot (0x10).
    Snapshot(SnapshotPacket),
    /// Input ack (0x11).
    InputAck { input_seq: InputSeq, tick: Tick },
    /// Clear all (0x12).
    ClearAll,
    /// Assign controlled entity (0x20).
    AssignEntity { entity_id: EntityId },
    /// Pong (0xFE).
    Pong { client_time_ms: f64 },
}

impl ServerPacket {
    /// Parse a server packet from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::EmptyPacket);
        }

        let mut reader = BinaryReader::new(data.to_vec());
        let opcode = reader.get_u8()?;

        let packet = match opcode {
            0x10 => {
                let tick = reader.get_u64()?;
                let server_time_ms = reader.get_f64()?;
                let last_input_seq = match reader.get_u8()? {
                    0 => None,
                    _ => Some(reader.get_u32()?),
                };
                let count = reader.get_u16()? as usize;
                // 12 bytes per record; refuse counts the frame cannot hold.
                if reader.remaining() < count * 12 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let mut entities = Vec::with_capacity(count);
                for _ in 0..count {
                    let id = reader.get_u32()?;
                    let x = reader.get_f32()?;
                    let y = reader.get_f32()?;
                    entities.push(EntityRecord {
                        id,
                        position: Position::new(x, y),
                    });
                }
                ServerPacket::Snapshot(SnapshotPacket {
                    tick,
                    server_time_ms,
                    last_input_seq,
                    entities,
                })
            }
            0x11 => ServerPacket::InputAck {
                input_seq: reader.get_u32()?,
                tick: reader.get_u64()?,
            },
            0x12 => ServerPacket::ClearAll,
            0x20 => ServerPacket::AssignEntity {
                entity_id: reader.get_u32()?,
            },
            0xFE => ServerPacket::Pong {
                client_time_ms: reader.get_f64()?,
            },
            _ => return Err(ProtocolError::InvalidOpcode(opcode)),
        };
        reader.finish()?;
        Ok(packet)
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = BinaryWriter::new();
        match self {
            ServerPacket::Snapshot(snapshot) => {
                writer.put_u8(ServerOpcode::Snapshot as u8);
                writer.put_u64(snapshot.tick);
                writer.put_f64(snapshot.server_time_ms);
                match snapshot.last_input_seq {
                    Some(seq) => {
                        writer.put_u8(1);
                        writer.put_u32(seq);
                    }
                    None => writer.put_u8(0),
                }
                let count = snapshot.entities.len().min(u16::MAX as usize);
                writer.put_u16(count as u16);
                for record in &snapshot.entities[..count] {
                    writer.put_u32(record.id);
                    writer.put_f32(record.position.x);
                    writer.put_f32(record.position.y);
                }
            }
            ServerPacket::InputAck { input_seq, tick } => {
                writer.put_u8(ServerOpcode::InputAck as u8);
                writer.put_u32(*input_seq);
                writer.put_u64(*tick);
            }
            ServerPacket::ClearAll => writer.put_u8(ServerOpcode::ClearAll as u8),
            ServerPacket::AssignEntity { entity_id } => {
                writer.put_u8(ServerOpcode::AssignEntity as u8);
                writer.put_u32(*entity_id);
            }
            ServerPacket::Pong { client_time_ms } => {
                writer.put_u8(ServerOpcode::Pong as u8);
                writer.put_f64(*client_time_ms);
            }
        }
        writer.finish()
    }
}
