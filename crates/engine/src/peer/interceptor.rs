//! Outbound RTP interceptor that injects the audio-level header extension
//! negotiated in [`super::sdp`] into every packet the publisher's audio
//! track actually sends.
//!
//! Shaped after a `webrtc-rs` `Interceptor`/`InterceptorBuilder` pair:
//! `bind_local_stream` wraps the writer webrtc-rs hands it with one that
//! rewrites the packet before forwarding it down the chain, the same way a
//! transport-wide congestion control extension would be stamped on send.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use webrtc::interceptor::stream_info::StreamInfo;
use webrtc::interceptor::{
    self, Attributes, Interceptor, InterceptorBuilder, RTCPReader, RTCPWriter, RTPReader, RTPWriter,
};
use webrtc::rtp;
use webrtc::util::{Marshal, Unmarshal};

use super::rtp::inject_audio_level;

/// Sentinel meaning "no extmap id negotiated yet" — valid ids are 1..=14.
const NO_EXTMAP_ID: u8 = 0;

/// Shared cell the interceptor reads from and [`super::PeerController`]
/// writes to once `create_offer()` has negotiated an extmap id.
#[derive(Clone, Default)]
pub struct AudioLevelExtmapId(Arc<AtomicU8>);

impl AudioLevelExtmapId {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(NO_EXTMAP_ID)))
    }

    pub fn set(&self, id: u8) {
        self.0.store(id, Ordering::Release);
    }

    pub fn get(&self) -> Option<u8> {
        match self.0.load(Ordering::Acquire) {
            NO_EXTMAP_ID => None,
            id => Some(id),
        }
    }
}

pub struct AudioLevelInterceptor {
    extmap_id: AudioLevelExtmapId,
}

#[async_trait]
impl Interceptor for AudioLevelInterceptor {
    async fn bind_rtcp_reader(
        &self,
        reader: Arc<dyn RTCPReader + Send + Sync>,
    ) -> Arc<dyn RTCPReader + Send + Sync> {
        reader
    }

    async fn bind_rtcp_writer(
        &self,
        writer: Arc<dyn RTCPWriter + Send + Sync>,
    ) -> Arc<dyn RTCPWriter + Send + Sync> {
        writer
    }

    async fn bind_local_stream(
        &self,
        _info: &StreamInfo,
        writer: Arc<dyn RTPWriter + Send + Sync>,
    ) -> Arc<dyn RTPWriter + Send + Sync> {
        Arc::new(AudioLevelRtpWriter {
            extmap_id: self.extmap_id.clone(),
            next: writer,
        })
    }

    async fn unbind_local_stream(&self, _info: &StreamInfo) {}

    async fn bind_remote_stream(
        &self,
        _info: &StreamInfo,
        reader: Arc<dyn RTPReader + Send + Sync>,
    ) -> Arc<dyn RTPReader + Send + Sync> {
        reader
    }

    async fn unbind_remote_stream(&self, _info: &StreamInfo) {}

    async fn close(&self) -> Result<(), interceptor::Error> {
        Ok(())
    }
}

struct AudioLevelRtpWriter {
    extmap_id: AudioLevelExtmapId,
    next: Arc<dyn RTPWriter + Send + Sync>,
}

#[async_trait]
impl RTPWriter for AudioLevelRtpWriter {
    async fn write(&self, pkt: &rtp::packet::Packet, attributes: &Attributes) -> Result<usize, interceptor::Error> {
        let Some(extmap_id) = self.extmap_id.get() else {
            return self.next.write(pkt, attributes).await;
        };

        let raw = pkt.marshal()?;
        let injected = inject_audio_level(&raw, extmap_id);
        let mut buf = injected.as_slice();
        match rtp::packet::Packet::unmarshal(&mut buf) {
            Ok(rewritten) => self.next.write(&rewritten, attributes).await,
            Err(_) => self.next.write(pkt, attributes).await,
        }
    }
}

pub struct AudioLevelInterceptorBuilder {
    extmap_id: AudioLevelExtmapId,
}

impl AudioLevelInterceptorBuilder {
    pub fn new(extmap_id: AudioLevelExtmapId) -> Self {
        Self { extmap_id }
    }
}

impl InterceptorBuilder for AudioLevelInterceptorBuilder {
    fn build(&self, _id: &str) -> Result<Arc<dyn Interceptor + Send + Sync>, interceptor::Error> {
        Ok(Arc::new(AudioLevelInterceptor {
            extmap_id: self.extmap_id.clone(),
        }))
    }
}
