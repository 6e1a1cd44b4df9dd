//! Error taxonomy for the engine core.

use thiserror::Error;

/// Errors returned by the [`crate::signal::Signal`] transport.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    InvalidUrl(#[from] lk_protocol::UrlError),
    #[error(transparent)]
    Message(#[from] lk_protocol::MessageError),
    #[error("{0}")]
    Other(String),
}

/// Reasons a signaling connect attempt can fail, surfaced through
/// `Signal::get_failure_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Unreachable,
    BadToken,
    Unauthorized,
    ClientOther,
    Internal,
}

impl FailureReason {
    /// Classify an HTTP status code observed during the WebSocket handshake.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => FailureReason::BadToken,
            401 => FailureReason::Unauthorized,
            500..=599 => FailureReason::Internal,
            400..=499 => FailureReason::ClientOther,
            _ => FailureReason::Unreachable,
        }
    }
}

/// Errors returned by the [`crate::peer::PeerController`].
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error("peer is not in a state that allows this operation")]
    InvalidState,
    #[error(transparent)]
    Rtc(#[from] webrtc::Error),
    #[error(transparent)]
    Message(#[from] lk_protocol::MessageError),
}

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalError),
    #[error("rtc error: {0}")]
    Rtc(#[from] PeerError),
    #[error("media error: {0}")]
    Media(String),
    #[error("{0}")]
    Other(String),
}
