//! The engine task: owns the real transports and drives the pure state
//! machine in [`crate::reducer`].
//!
//! Mirrors `frecar-beam`'s agent main loop: one task pulls events off a
//! queue, asks a pure function what to do, and executes the result against
//! the owned Signal/Peer/media handles. The handles are the only state that
//! lives outside `reduce()` — everything `reduce()` needs to decide the next
//! action is threaded through `EngineState`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::warn;
use webrtc::ice_transport::ice_server::RTCIceServer;

use lk_protocol::wire::DataPacket;

use crate::config::{EngineConfig, IceConfig};
use crate::error::EngineError;
use crate::event::{Event, InboundDataPacket, PeerTarget};
use crate::media::{self, Capture};
use crate::observer::EngineObserver;
use crate::peer::{MediaConfig, PeerController, PeerObservers, PeerRole, SignalOutbox};
use crate::queue::{self, EventReceiver, EventSender};
use crate::reducer::{self, Action, EngineState};
use crate::signal::Signal;
use crate::track::{AudioTrackDescription, VideoTrackDescription};

/// The public engine surface: `create` / `connect` / `close` /
/// `send_data_packet` / `destroy`. Everything else is driven internally by
/// the event loop in [`Engine::run`].
pub struct Engine {
    event_tx: EventSender,
    is_running: Arc<AtomicBool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    signal: Arc<Signal>,
    publisher: AsyncMutex<Option<Arc<PeerController>>>,
    subscriber: AsyncMutex<Option<Arc<PeerController>>>,
    media_streaming: Arc<AtomicBool>,
    media_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    backoff_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    config: EngineConfig,
    observer: Arc<dyn EngineObserver>,
    capture: Option<Arc<dyn Capture>>,
}

impl Engine {
    /// Build the engine and spawn its event loop task. Nothing connects
    /// until [`Engine::connect`] is called.
    pub fn create(
        config: EngineConfig,
        observer: Arc<dyn EngineObserver>,
        capture: Option<Arc<dyn Capture>>,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = queue::channel(config.engine_queue_size);
        let signal = Signal::new(event_tx.clone());

        let engine = Arc::new(Self {
            event_tx,
            is_running: Arc::new(AtomicBool::new(true)),
            task: std::sync::Mutex::new(None),
            signal,
            publisher: AsyncMutex::new(None),
            subscriber: AsyncMutex::new(None),
            media_streaming: Arc::new(AtomicBool::new(false)),
            media_task: std::sync::Mutex::new(None),
            backoff_task: std::sync::Mutex::new(None),
            config,
            observer,
            capture,
        });

        let task_handle = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run(event_rx).await })
        };
        *engine.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task_handle);
        engine
    }

    /// Queue a connect command.
    pub fn connect(&self, server_url: impl Into<String>, token: impl Into<String>) {
        self.event_tx.push(Event::CmdConnect {
            server_url: server_url.into(),
            token: token.into(),
        });
    }

    /// Queue a close command. Returns immediately; the engine tears down
    /// asynchronously on its own task: it sends `Leave` and waits up to
    /// `close_timeout_ms` for it to reach the wire, then closes the signal
    /// socket and destroys both peers regardless of whether the wait timed
    /// out.
    pub fn close(&self) {
        self.event_tx.push(Event::CmdClose);
    }

    /// Send a data packet over the publisher's reliable or lossy channel.
    pub async fn send_data_packet(&self, packet: DataPacket, reliable: bool) -> Result<(), EngineError> {
        let publisher = self.publisher.lock().await.clone();
        let Some(publisher) = publisher else {
            return Err(EngineError::Other("not connected".to_string()));
        };
        publisher
            .send_data_packet(&packet, reliable)
            .await
            .map_err(EngineError::from)
    }

    /// Stop the event loop and wait for it to drain. Consumes the engine's
    /// `Arc` handle; any other clones become inert once this returns.
    pub async fn destroy(self: Arc<Self>) {
        self.is_running.store(false, Ordering::Release);
        self.event_tx.push(Event::CmdClose);
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>, mut event_rx: EventReceiver) {
        let mut state = EngineState::default();
        while let Some(event) = event_rx.recv(&self.is_running).await {
            let (next_state, actions) = reducer::reduce(state, event, self.config.max_retries);
            state = next_state;
            for action in actions {
                self.execute_action(action, &state).await;
            }
        }
        let dropped = event_rx.drain();
        if dropped > 0 {
            warn!(dropped, "dropped queued events on engine shutdown");
        }
    }

    async fn execute_action(&self, action: Action, state: &EngineState) {
        match action {
            Action::ConnectSignal {
                server_url,
                token,
                reconnect,
            } => self.signal.connect(server_url, token, reconnect),
            Action::CloseSignal => self.signal.close(),
            Action::SendLeave => {
                let timeout = Duration::from_millis(self.config.close_timeout_ms);
                if tokio::time::timeout(timeout, self.signal.send_leave())
                    .await
                    .is_err()
                {
                    warn!("timed out waiting to send leave request, closing anyway");
                }
            }
            Action::CreatePeers => self.create_peers(state).await,
            Action::DestroyPeers => self.destroy_peers().await,
            Action::RouteSdpToPublisher { sdp_type, sdp } => {
                self.route_sdp(PeerRole::Publisher, sdp_type, sdp).await
            }
            Action::RouteSdpToSubscriber { sdp_type, sdp } => {
                self.route_sdp(PeerRole::Subscriber, sdp_type, sdp).await
            }
            Action::RouteIceCandidate { target, candidate } => {
                self.route_ice_candidate(target, candidate).await
            }
            Action::PublishTracks => self.publish_tracks().await,
            Action::StopMediaStreaming => self.stop_media_streaming(),
            Action::StartBackoffTimer { delay_attempt } => self.start_backoff_timer(delay_attempt),
            Action::StopBackoffTimer => self.stop_backoff_timer(),
            Action::EnqueueMaxRetriesReached => self.event_tx.push(Event::MaxRetriesReached),
            Action::EmitExternalState(state) => self.observer.on_state_changed(state),
            Action::ForwardRoomInfo(room) => self.observer.on_room_info(room),
            Action::ForwardParticipantInfo { info, is_local } => {
                self.observer.on_participant_info(info, is_local)
            }
            Action::ForwardDataPacket(packet) => self.observer.on_data_packet(packet),
        }
    }

    /// Create both peer connections after a `Join` response. The publisher's
    /// data channels and initial offer are created here too:
    /// `_reliable`/`_lossy` must exist before `create_offer` so the SCTP
    /// association appears in the first SDP.
    async fn create_peers(&self, state: &EngineState) {
        let ice_servers = build_ice_servers(state, &self.config.ice);

        let publisher_outbox: Arc<dyn SignalOutbox> = Arc::clone(&self.signal) as Arc<dyn SignalOutbox>;
        let pub_event_tx = self.event_tx.clone();
        let pub_data_tx = self.event_tx.clone();
        let publisher_media = MediaConfig {
            publish_audio: self.config.publish_track_names.audio.is_some(),
            publish_video: self.config.publish_track_names.video.is_some(),
        };
        let publisher = match PeerController::new(
            PeerRole::Publisher,
            ice_servers.clone(),
            state.force_relay,
            publisher_media,
            publisher_outbox,
            PeerObservers {
                on_state_changed: Box::new(move |peer_state| {
                    pub_event_tx.push(Event::PeerPubState { state: peer_state });
                }),
                on_data_packet: Box::new(move |packet| {
                    pub_data_tx.push(Event::PeerDataPacket {
                        packet: InboundDataPacket { packet },
                    });
                }),
            },
        )
        .await
        {
            Ok(peer) => peer,
            Err(e) => {
                warn!("failed to create publisher peer: {e}");
                return;
            }
        };

        if let Err(e) = publisher.create_data_channels().await {
            warn!("failed to create publisher data channels: {e}");
        }
        match publisher.create_offer().await {
            Ok(offer) => self.signal.send_offer(offer),
            Err(e) => warn!("failed to create publisher offer: {e}"),
        }
        *self.publisher.lock().await = Some(publisher);

        let subscriber_outbox: Arc<dyn SignalOutbox> = Arc::clone(&self.signal) as Arc<dyn SignalOutbox>;
        let sub_event_tx = self.event_tx.clone();
        let subscriber = match PeerController::new(
            PeerRole::Subscriber,
            ice_servers,
            state.force_relay,
            MediaConfig::default(),
            subscriber_outbox,
            PeerObservers {
                on_state_changed: Box::new(move |peer_state| {
                    sub_event_tx.push(Event::PeerSubState { state: peer_state });
                }),
                // The subscriber peer never opens a data channel of its own;
                // inbound data always arrives on the publisher's mirrored
                // channel from the SFU's perspective.
                on_data_packet: Box::new(|_packet| {}),
            },
        )
        .await
        {
            Ok(peer) => peer,
            Err(e) => {
                warn!("failed to create subscriber peer: {e}");
                return;
            }
        };
        *self.subscriber.lock().await = Some(subscriber);
    }

    async fn destroy_peers(&self) {
        if let Some(peer) = self.publisher.lock().await.take() {
            if let Err(e) = peer.close().await {
                warn!("error closing publisher peer: {e}");
            }
        }
        if let Some(peer) = self.subscriber.lock().await.take() {
            if let Err(e) = peer.close().await {
                warn!("error closing subscriber peer: {e}");
            }
        }
    }

    async fn route_sdp(&self, role: PeerRole, sdp_type: &'static str, sdp: String) {
        let peer = match role {
            PeerRole::Publisher => self.publisher.lock().await.clone(),
            PeerRole::Subscriber => self.subscriber.lock().await.clone(),
        };
        let Some(peer) = peer else {
            warn!(?role, "sdp routed to a peer that does not exist yet");
            return;
        };
        match peer.handle_sdp(sdp_type, &sdp).await {
            Ok(Some(answer)) => self.signal.send_answer(answer),
            Ok(None) => {}
            Err(e) => warn!(?role, "failed to apply {sdp_type} sdp: {e}"),
        }
    }

    async fn route_ice_candidate(&self, target: PeerTarget, candidate: String) {
        let peer = match target {
            PeerTarget::Publisher => self.publisher.lock().await.clone(),
            PeerTarget::Subscriber => self.subscriber.lock().await.clone(),
        };
        let Some(peer) = peer else {
            return;
        };
        if let Err(e) = peer.handle_ice_candidate(&candidate).await {
            warn!(?target, "failed to add trickled ice candidate: {e}");
        }
    }

    /// Entering `Connected`: send `AddTrackRequest`s for whatever is
    /// configured, then start the media streaming loop if a capture handle
    /// was supplied.
    async fn publish_tracks(&self) {
        let audio = self
            .config
            .publish_track_names
            .audio
            .clone()
            .map(|name| AudioTrackDescription {
                name,
                muted: false,
                channel_count: 2,
            });
        let video = self
            .config
            .publish_track_names
            .video
            .clone()
            .map(|name| VideoTrackDescription {
                name,
                muted: false,
                layers: Vec::new(),
            });
        for request in reducer::publish_track_requests(audio, video) {
            self.signal.send_add_track(request);
        }

        let Some(capture) = self.capture.clone() else {
            return;
        };
        let Some(publisher) = self.publisher.lock().await.clone() else {
            return;
        };
        self.media_streaming.store(true, Ordering::Release);
        let handle = media::spawn(
            capture,
            publisher,
            Arc::clone(&self.media_streaming),
            self.config.publish_interval_ms,
        );
        *self.media_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    fn stop_media_streaming(&self) {
        self.media_streaming.store(false, Ordering::Release);
        if let Some(handle) = self.media_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    fn start_backoff_timer(&self, delay_attempt: u32) {
        let mut rng = rand::thread_rng();
        let delay_ms = lk_protocol::backoff::delay_ms(delay_attempt, &mut rng);
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            event_tx.push(Event::TimerExpired);
        });
        *self
            .backoff_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    fn stop_backoff_timer(&self) {
        if let Some(handle) = self
            .backoff_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Prefer the ICE servers the SFU handed down in the join response; fall
/// back to the configured default STUN/TURN set only when the server sent
/// none.
fn build_ice_servers(state: &EngineState, config: &IceConfig) -> Vec<RTCIceServer> {
    if !state.ice_servers.is_empty() {
        return state
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
            })
            .collect();
    }

    let mut servers = Vec::new();
    if !config.stun_urls.is_empty() {
        servers.push(RTCIceServer {
            urls: config.stun_urls.clone(),
            ..Default::default()
        });
    }
    if !config.turn_urls.is_empty() {
        servers.push(RTCIceServer {
            urls: config.turn_urls.clone(),
            username: config.turn_username.clone().unwrap_or_default(),
            credential: config.turn_credential.clone().unwrap_or_default(),
        });
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;
    use lk_protocol::wire::IceServer;

    #[test]
    fn falls_back_to_configured_ice_servers_when_join_sent_none() {
        let state = EngineState::default();
        let config = IceConfig {
            stun_urls: vec!["stun:example.com:3478".to_string()],
            turn_urls: Vec::new(),
            turn_username: None,
            turn_credential: None,
            force_relay: false,
        };
        let servers = build_ice_servers(&state, &config);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["stun:example.com:3478".to_string()]);
    }

    #[test]
    fn prefers_join_provided_ice_servers() {
        let mut state = EngineState::default();
        state.ice_servers = vec![IceServer {
            urls: vec!["turn:sfu.example.com:443".to_string()],
            username: "u".to_string(),
            credential: "p".to_string(),
        }];
        let config = IceConfig {
            stun_urls: vec!["stun:example.com:3478".to_string()],
            turn_urls: Vec::new(),
            turn_username: None,
            turn_credential: None,
            force_relay: false,
        };
        let servers = build_ice_servers(&state, &config);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].username, "u");
    }
}
