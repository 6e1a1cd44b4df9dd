//! Protocol codec: encode/decode of signaling and data-packet messages.

use bytes::Bytes;
use prost::Message;
use serde::Deserialize;

use crate::error::MessageError;
use crate::wire::{DataPacket, SignalRequest, SignalResponse, SignalTarget, TrickleRequest};

/// Decode a `SignalResponse` from a WebSocket binary frame.
pub fn decode_signal_response(bytes: &[u8]) -> Result<SignalResponse, MessageError> {
    Ok(SignalResponse::decode(bytes)?)
}

/// Encode a `SignalRequest` into a freshly allocated buffer, sized up front
/// via `encoded_len` so there is exactly one allocation on the hot path.
pub fn encode_signal_request(request: &SignalRequest) -> Result<Bytes, MessageError> {
    let mut buf = Vec::with_capacity(request.encoded_len());
    request.encode(&mut buf)?;
    Ok(Bytes::from(buf))
}

/// Decode a data packet received over a data channel. Returns
/// `MessageError::NotSupported` when `which_value == 0` (the oneof carries
/// no variant) so the caller can silently drop unknown packet types instead
/// of treating them as an error.
pub fn decode_data_packet(bytes: &[u8]) -> Result<DataPacket, MessageError> {
    let packet = DataPacket::decode(bytes)?;
    if packet.value.is_none() {
        return Err(MessageError::NotSupported);
    }
    Ok(packet)
}

pub fn encode_data_packet(packet: &DataPacket) -> Result<Bytes, MessageError> {
    let mut buf = Vec::with_capacity(packet.encoded_len());
    packet.encode(&mut buf)?;
    Ok(Bytes::from(buf))
}

#[derive(Deserialize)]
struct CandidateInit {
    candidate: String,
}

/// Extract the SDP candidate string out of a trickle request's JSON payload
/// (`{"candidate": "<sdp candidate>", ...}`).
pub fn trickle_get_candidate(trickle: &TrickleRequest) -> Result<String, MessageError> {
    let parsed: serde_json::Value = serde_json::from_str(&trickle.candidate_init)?;
    parsed
        .get("candidate")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or(MessageError::MissingCandidateField)
}

/// Build a `TrickleRequest` wire value from a raw candidate string, the
/// inverse of [`trickle_get_candidate`]. Used by peer-side ICE candidate
/// callbacks to produce the outbound signaling request.
pub fn build_trickle(candidate: &str, target: SignalTarget) -> TrickleRequest {
    let init = CandidateInit {
        candidate: candidate.to_string(),
    };
    TrickleRequest {
        candidate_init: serde_json::to_string(&init).unwrap_or_default(),
        target: target as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{signal_request, signal_response, JoinResponse, Ping, UserPacket};

    #[test]
    fn trickle_roundtrip() {
        let trickle = build_trickle("candidate:1 1 UDP ...", SignalTarget::Publisher);
        let candidate = trickle_get_candidate(&trickle).unwrap();
        assert_eq!(candidate, "candidate:1 1 UDP ...");
    }

    #[test]
    fn trickle_missing_field_errors() {
        let trickle = TrickleRequest {
            candidate_init: r#"{"sdpMid":"0"}"#.to_string(),
            target: SignalTarget::Publisher as i32,
        };
        assert!(matches!(
            trickle_get_candidate(&trickle),
            Err(MessageError::MissingCandidateField)
        ));
    }

    #[test]
    fn trickle_invalid_json_errors() {
        let trickle = TrickleRequest {
            candidate_init: "not json".to_string(),
            target: SignalTarget::Publisher as i32,
        };
        assert!(matches!(
            trickle_get_candidate(&trickle),
            Err(MessageError::InvalidTrickleJson(_))
        ));
    }

    #[test]
    fn signal_request_ping_roundtrip() {
        let req = SignalRequest {
            message: Some(signal_request::Message::PingReq(Ping {
                timestamp: 42,
                rtt: 7,
            })),
        };
        let bytes = encode_signal_request(&req).unwrap();
        let decoded = SignalRequest::decode(bytes.as_ref()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn signal_response_join_roundtrip() {
        let resp = SignalResponse {
            message: Some(signal_response::Message::Join(JoinResponse {
                subscriber_primary: false,
                ..Default::default()
            })),
        };
        let mut buf = Vec::new();
        resp.encode(&mut buf).unwrap();
        let decoded = decode_signal_response(&buf).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn data_packet_user_roundtrip() {
        let pkt = DataPacket {
            value: Some(crate::wire::data_packet::Value::User(UserPacket {
                payload: b"hello".to_vec(),
                topic: "chat".to_string(),
            })),
        };
        let bytes = encode_data_packet(&pkt).unwrap();
        let decoded = decode_data_packet(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn data_packet_empty_oneof_is_not_supported() {
        let pkt = DataPacket { value: None };
        let mut buf = Vec::new();
        pkt.encode(&mut buf).unwrap();
        assert!(matches!(
            decode_data_packet(&buf),
            Err(MessageError::NotSupported)
        ));
    }
}
