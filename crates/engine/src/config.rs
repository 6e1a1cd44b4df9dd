//! Engine configuration: a small, enumerated option set consumed at
//! `create`, mirroring `frecar-beam`'s `BeamConfig` `#[serde(default =
//! "...")]` style.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_queue_size")]
    pub engine_queue_size: usize,
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    #[serde(default)]
    pub publish_track_names: PublishTrackNames,
    /// Emits extra timing logs on the hot paths.
    #[serde(default)]
    pub benchmark_mode: bool,
    /// Bound on how long `close()` waits for the `Leave` request to reach
    /// the wire before tearing down the signal connection anyway.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    #[serde(default)]
    pub ice: IceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            engine_queue_size: default_queue_size(),
            publish_interval_ms: default_publish_interval_ms(),
            publish_track_names: PublishTrackNames::default(),
            benchmark_mode: false,
            close_timeout_ms: default_close_timeout_ms(),
            ice: IceConfig::default(),
        }
    }
}

/// Names for the audio/video tracks this engine publishes; a `None` field
/// means that track is not published — `publish_tracks()` is a no-op when
/// neither field is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishTrackNames {
    pub audio: Option<String>,
    pub video: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    #[serde(default = "default_stun_urls")]
    pub stun_urls: Vec<String>,
    #[serde(default)]
    pub turn_urls: Vec<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
    #[serde(default)]
    pub force_relay: bool,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_urls: default_stun_urls(),
            turn_urls: Vec::new(),
            turn_username: None,
            turn_credential: None,
            force_relay: false,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_queue_size() -> usize {
    256
}

fn default_publish_interval_ms() -> u64 {
    20
}

fn default_close_timeout_ms() -> u64 {
    1500
}

fn default_stun_urls() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.publish_interval_ms, 20);
        assert!(!cfg.ice.stun_urls.is_empty());
    }

    #[test]
    fn no_track_names_means_publish_is_a_noop() {
        let cfg = EngineConfig::default();
        assert!(cfg.publish_track_names.audio.is_none());
        assert!(cfg.publish_track_names.video.is_none());
    }

    #[test]
    fn close_timeout_defaults_to_1500ms() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.close_timeout_ms, 1500);
    }
}
