//! Collaborator hooks injected into a [`MatchSession`](crate::MatchSession).

use bytes::Bytes;
use protocol::packets::ClientPacket;
use protocol::{EntityId, InputSeq, MoveCommand, Position};

use crate::prediction::ReconcileOutcome;

/// Outbound path for predicted inputs.
pub trait InputSink {
    fn send_input(&mut self, input_seq: InputSeq, command: MoveCommand);
}

impl<F> InputSink for F
where
    F: FnMut(InputSeq, MoveCommand),
{
    fn send_input(&mut self, input_seq: InputSeq, command: MoveCommand) {
        self(input_seq, command)
    }
}

/// Encodes inputs as wire frames and hands them to a writer.
pub struct PacketSink<W> {
    write: W,
}

impl<W: FnMut(Bytes)> PacketSink<W> {
    pub fn new(write: W) -> Self {
        Self { write }
    }
}

impl<W: FnMut(Bytes)> InputSink for PacketSink<W> {
    fn send_input(&mut self, input_seq: InputSeq, command: MoveCommand) {
        (self.write)(ClientPacket::Input { input_seq, command }.encode());
    }
}

/// Notifications for the renderer/HUD side. All methods default to no-ops.
pub trait SessionObserver {
    fn entity_spawned(&mut self, _id: EntityId, _position: Position) {}
    fn entity_removed(&mut self, _id: EntityId) {}
    fn corrected(&mut self, _outcome: &ReconcileOutcome) {}
    fn session_reset(&mut self) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
