//! The event type processed by the engine state machine.

use lk_protocol::wire::SignalResponse;

use crate::error::FailureReason;
use crate::peer::{PeerRole, PeerState};

/// Connection state reported by the [`crate::signal::Signal`] transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Connecting,
    Connected,
    Disconnected,
    Failed(FailureReason),
}

/// A decoded data packet handed off from a peer's data channel, carrying
/// which peer it arrived on (not part of the wire format, added so the
/// engine can log provenance).
#[derive(Debug, Clone)]
pub struct InboundDataPacket {
    pub packet: lk_protocol::wire::DataPacket,
}

/// Tagged event processed one at a time by the engine task.
///
/// Events carrying heap-allocated payloads (URL+token strings, signal
/// responses with dynamic fields, decoded data packets) are owned
/// move-only values: the state handler that matches on them takes
/// ownership, or the queue drain routine drops them on shutdown. There is
/// no reference counting here — Rust's ownership model gives an "exactly
/// one free" guarantee for every event without any bookkeeping.
#[derive(Debug)]
pub enum Event {
    /// User command: connect to a room.
    CmdConnect { server_url: String, token: String },
    /// User command: close the session.
    CmdClose,
    /// Signal transport state changed.
    SigState { state: SignalState },
    /// Signal transport delivered a decoded response.
    SigResponse { response: SignalResponse },
    /// Publisher peer connection state changed.
    PeerPubState { state: PeerState },
    /// Subscriber peer connection state changed.
    PeerSubState { state: PeerState },
    /// A peer decoded an inbound data packet.
    PeerDataPacket { packet: InboundDataPacket },
    /// The engine's one-shot backoff timer fired.
    TimerExpired,
    /// The retry budget has been exhausted.
    MaxRetriesReached,
}

impl Event {
    /// Priority events jump to the front of the queue: signaling/peer state
    /// changes, timer expiries, user commands, and server-initiated `Leave`
    /// responses.
    pub fn is_priority(&self) -> bool {
        match self {
            Event::SigState { .. }
            | Event::PeerPubState { .. }
            | Event::PeerSubState { .. }
            | Event::TimerExpired
            | Event::MaxRetriesReached
            | Event::CmdConnect { .. }
            | Event::CmdClose => true,
            Event::SigResponse { response } => matches!(
                response.message,
                Some(lk_protocol::wire::signal_response::Message::Leave(_))
            ),
            _ => false,
        }
    }
}

/// Which underlying peer a routed SDP/ICE message targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTarget {
    Publisher,
    Subscriber,
}

impl From<PeerRole> for PeerTarget {
    fn from(role: PeerRole) -> Self {
        match role {
            PeerRole::Publisher => PeerTarget::Publisher,
            PeerRole::Subscriber => PeerTarget::Subscriber,
        }
    }
}
