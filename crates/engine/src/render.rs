//! Render contract: the core hands decoded audio info and samples to an
//! opaque sink. All paths downstream of this core are 16-bit linear PCM;
//! codec-specific framing ends here.

/// Codec as negotiated by the subscriber peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAudioCodec {
    Opus,
    G711A,
    G711U,
}

/// Codec enum on the render side. G711 variants are always 8 kHz mono
/// regardless of what the peer side reports, since that's the only rate the
/// codec is defined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderAudioCodec {
    Opus,
    G711A,
    G711U,
}

impl From<PeerAudioCodec> for RenderAudioCodec {
    fn from(codec: PeerAudioCodec) -> Self {
        match codec {
            PeerAudioCodec::Opus => RenderAudioCodec::Opus,
            PeerAudioCodec::G711A => RenderAudioCodec::G711A,
            PeerAudioCodec::G711U => RenderAudioCodec::G711U,
        }
    }
}

/// Audio stream parameters handed to `Render::add_audio_stream`.
#[derive(Debug, Clone)]
pub struct AudioStreamInfo {
    pub codec: RenderAudioCodec,
    pub sample_rate: u32,
    pub channels: u8,
}

impl AudioStreamInfo {
    /// Build stream info from the peer-reported codec and rate, forcing
    /// G711 to its fixed 8 kHz mono format.
    pub fn new(codec: PeerAudioCodec, sample_rate: u32, channels: u8) -> Self {
        match codec {
            PeerAudioCodec::G711A | PeerAudioCodec::G711U => Self {
                codec: codec.into(),
                sample_rate: 8000,
                channels: 1,
            },
            PeerAudioCodec::Opus => Self {
                codec: codec.into(),
                sample_rate,
                channels,
            },
        }
    }
}

/// A decoded 16-bit linear PCM audio buffer, timestamped with its
/// presentation time.
#[derive(Debug, Clone)]
pub struct AudioData {
    pub pts: i64,
    pub data: Vec<u8>,
}

/// The render contract this core consumes: an opaque sink for decoded
/// remote audio. Implementations own the actual playback pipeline.
pub trait Render: Send + Sync {
    fn add_audio_stream(&self, info: AudioStreamInfo);
    fn add_audio_data(&self, data: AudioData);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn g711_is_forced_to_8khz_mono() {
        let info = AudioStreamInfo::new(PeerAudioCodec::G711A, 48000, 2);
        assert_eq!(info.sample_rate, 8000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.codec, RenderAudioCodec::G711A);
    }

    #[test]
    fn opus_keeps_reported_rate_and_channels() {
        let info = AudioStreamInfo::new(PeerAudioCodec::Opus, 48000, 2);
        assert_eq!(info.sample_rate, 48000);
        assert_eq!(info.channels, 2);
    }
}
