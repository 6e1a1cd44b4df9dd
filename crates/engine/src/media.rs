//! Media streaming loop: pulls encoded frames from capture and forwards them
//! to the publisher peer at a fixed cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::peer::PeerController;

/// An encoded media sample handed to the publisher peer.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub duration_ns: u64,
}

/// The capture contract this core consumes: an opaque source of
/// already-encoded audio/video frames. Implementations own the actual
/// capture pipeline; this trait only pulls.
pub trait Capture: Send + Sync {
    /// Pop the next available encoded audio frame, if any, without blocking.
    fn poll_audio_frame(&self) -> Option<EncodedFrame>;
    /// Pop the next available encoded video frame, if any, without blocking.
    fn poll_video_frame(&self) -> Option<EncodedFrame>;
}

/// Spawn the media streaming task. Drains all available audio frames per
/// tick but at most one video frame per tick; exits as soon as
/// `is_streaming` is cleared.
pub fn spawn(
    capture: Arc<dyn Capture>,
    publisher: Arc<PeerController>,
    is_streaming: Arc<AtomicBool>,
    interval_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        while is_streaming.load(Ordering::Acquire) {
            tick.tick().await;
            if !is_streaming.load(Ordering::Acquire) {
                break;
            }

            while let Some(frame) = capture.poll_audio_frame() {
                if let Err(e) = publisher.send_audio(&frame.data, frame.duration_ns).await {
                    warn!("failed to send audio frame: {e}");
                }
            }

            if let Some(frame) = capture.poll_video_frame() {
                if let Err(e) = publisher.send_video(&frame.data, frame.duration_ns).await {
                    warn!("failed to send video frame: {e}");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeCapture {
        audio: Mutex<Vec<EncodedFrame>>,
        video: Mutex<Vec<EncodedFrame>>,
    }

    impl Capture for FakeCapture {
        fn poll_audio_frame(&self) -> Option<EncodedFrame> {
            self.audio.lock().unwrap().pop()
        }
        fn poll_video_frame(&self) -> Option<EncodedFrame> {
            self.video.lock().unwrap().pop()
        }
    }

    #[test]
    fn drains_all_audio_but_caps_video_per_tick() {
        let capture = FakeCapture {
            audio: Mutex::new(vec![
                EncodedFrame { data: vec![1], duration_ns: 1 },
                EncodedFrame { data: vec![2], duration_ns: 1 },
                EncodedFrame { data: vec![3], duration_ns: 1 },
            ]),
            video: Mutex::new(vec![
                EncodedFrame { data: vec![9], duration_ns: 1 },
                EncodedFrame { data: vec![8], duration_ns: 1 },
            ]),
        };

        let mut audio_drained = 0;
        while capture.poll_audio_frame().is_some() {
            audio_drained += 1;
        }
        assert_eq!(audio_drained, 3);

        let video_drained = capture.poll_video_frame();
        assert!(video_drained.is_some());
        // a second poll in the same (simulated) tick is never issued by the
        // real loop body; the remaining frame stays queued for next tick.
        assert!(capture.poll_video_frame().is_some());
    }
}
