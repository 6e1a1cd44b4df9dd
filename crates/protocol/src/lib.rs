//! Wire types and codec for the LiveKit client engine core.
//!
//! This crate owns the signaling URL builder, the protobuf codec for
//! `SignalRequest`/`SignalResponse`/`DataPacket`, and the jittered
//! exponential backoff function. `lk-engine` depends on this crate the same
//! way `beam-agent` depends on `beam-protocol`.

pub mod backoff;
pub mod codec;
pub mod error;
pub mod url;

/// Generated protobuf types (`proto/rtc.proto`), compiled at build time via
/// `prost-build` — the same codegen-at-build-time pattern
/// `medea-control-api-proto` uses for its gRPC schema.
pub mod wire {
    include!(concat!(env!("OUT_DIR"), "/livekit_rtc.rs"));
}

pub use error::{MessageError, UrlError};
pub use wire::{
    signal_request, signal_response, AddTrackRequest, AudioFeatures, ClientConfigSetting,
    ClientConfiguration, DataPacket, DataStreamChunk, DataStreamHeader, DataStreamTrailer,
    DisconnectReason, IceServer, JoinResponse, LeaveAction, LeaveRequest, ParticipantInfo,
    ParticipantUpdate, Ping, Pong, Room, RoomUpdate, RpcAck, RpcRequest, RpcResponse,
    SessionDescription, SignalRequest, SignalResponse, SignalTarget, TrackSource, TrackType,
    TrickleRequest, UpdateSubscription, UserPacket, VideoLayer, VideoQuality,
};
