//! Error taxonomy for the URL builder and protocol codec.

use thiserror::Error;

/// Errors from the signaling URL builder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("server url is empty")]
    Empty,
    #[error("unsupported scheme in server url (expected ws:// or wss://)")]
    UnsupportedScheme,
    #[error("token is empty")]
    EmptyToken,
}

/// Errors from encode/decode of signaling and data-packet messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("failed to decode protobuf message: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("failed to encode protobuf message: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("message carries no payload (which_value == 0)")]
    NotSupported,
    #[error("trickle payload is not valid JSON: {0}")]
    InvalidTrickleJson(#[from] serde_json::Error),
    #[error("trickle payload is missing the \"candidate\" field")]
    MissingCandidateField,
}
