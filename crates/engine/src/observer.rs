//! Public engine surface observer callbacks.

use lk_protocol::wire::{DataPacket, ParticipantInfo, Room};

use crate::reducer::ExternalState;

/// User-supplied callbacks mirroring the public engine surface's
/// `on_state_changed` / `on_participant_info` / `on_room_info` /
/// `on_data_packet`. All calls happen on the engine task.
pub trait EngineObserver: Send + Sync {
    fn on_state_changed(&self, state: ExternalState);
    fn on_room_info(&self, room: Room);
    fn on_participant_info(&self, info: ParticipantInfo, is_local: bool);
    fn on_data_packet(&self, packet: DataPacket);
}
