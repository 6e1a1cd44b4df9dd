//! Track description for publish.

use lk_protocol::wire::{AddTrackRequest, AudioFeatures, TrackSource, TrackType, VideoLayer};

/// Fixed client IDs for the two tracks this engine can publish — the core
/// never publishes more than one audio and one video track.
pub const AUDIO_CID: &str = "a0";
pub const VIDEO_CID: &str = "v0";

#[derive(Debug, Clone)]
pub enum TrackSourceKind {
    Microphone,
    Camera,
}

impl From<TrackSourceKind> for TrackSource {
    fn from(kind: TrackSourceKind) -> Self {
        match kind {
            TrackSourceKind::Microphone => TrackSource::Microphone,
            TrackSourceKind::Camera => TrackSource::Camera,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioTrackDescription {
    pub name: String,
    pub muted: bool,
    /// Stereo when the capture path reports 2 channels.
    pub channel_count: u8,
}

impl AudioTrackDescription {
    pub fn into_add_track_request(self) -> AddTrackRequest {
        AddTrackRequest {
            cid: AUDIO_CID.to_string(),
            name: self.name,
            r#type: TrackType::Audio as i32,
            source: TrackSource::from(TrackSourceKind::Microphone) as i32,
            muted: self.muted,
            layers: Vec::new(),
            audio_features: Some(AudioFeatures {
                stereo: self.channel_count == 2,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoLayerDescription {
    pub quality: lk_protocol::wire::VideoQuality,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct VideoTrackDescription {
    pub name: String,
    pub muted: bool,
    pub layers: Vec<VideoLayerDescription>,
}

impl VideoTrackDescription {
    pub fn into_add_track_request(self) -> AddTrackRequest {
        AddTrackRequest {
            cid: VIDEO_CID.to_string(),
            name: self.name,
            r#type: TrackType::Video as i32,
            source: TrackSource::from(TrackSourceKind::Camera) as i32,
            muted: self.muted,
            layers: self
                .layers
                .into_iter()
                .map(|l| VideoLayer {
                    quality: l.quality as i32,
                    width: l.width,
                    height: l.height,
                })
                .collect(),
            audio_features: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_audio_sets_stereo_feature() {
        let desc = AudioTrackDescription {
            name: "mic".into(),
            muted: false,
            channel_count: 2,
        };
        let req = desc.into_add_track_request();
        assert_eq!(req.cid, AUDIO_CID);
        assert!(req.audio_features.unwrap().stereo);
    }

    #[test]
    fn mono_audio_clears_stereo_feature() {
        let desc = AudioTrackDescription {
            name: "mic".into(),
            muted: false,
            channel_count: 1,
        };
        let req = desc.into_add_track_request();
        assert!(!req.audio_features.unwrap().stereo);
    }

    #[test]
    fn video_track_uses_fixed_cid() {
        let desc = VideoTrackDescription {
            name: "cam".into(),
            muted: false,
            layers: vec![VideoLayerDescription {
                quality: lk_protocol::wire::VideoQuality::High,
                width: 1280,
                height: 720,
            }],
        };
        let req = desc.into_add_track_request();
        assert_eq!(req.cid, VIDEO_CID);
        assert_eq!(req.layers.len(), 1);
    }
}
