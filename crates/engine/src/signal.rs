//! Signaling transport: one binary WebSocket connection carrying framed
//! `SignalRequest`/`SignalResponse` protocol buffers.
//!
//! Modeled on `frecar-beam`'s `connect_and_handle`: a single task owns the
//! socket, `tokio::select!`s between inbound frames and an outbound command
//! channel, and the owner drives reconnects from the outside rather than the
//! transport retrying on its own — backoff and retry policy live in the
//! engine's state machine, not here.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lk_protocol::wire::{
    signal_request, AddTrackRequest, DisconnectReason, LeaveAction, LeaveRequest, Ping,
    SessionDescription, SignalRequest, SignalTarget, TrickleRequest, UpdateSubscription,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::error::{FailureReason, SignalError};
use crate::event::SignalState;
use crate::peer::SignalOutbox;
use crate::queue::EventSender;

const NETWORK_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_millis(250);

enum Command {
    Offer(String),
    Answer(String),
    AddTrack(AddTrackRequest),
    UpdateSubscription(UpdateSubscription),
    Trickle(TrickleRequest),
    Leave(oneshot::Sender<()>),
    Close,
}

/// Owns the WebSocket, the ping timer, and the failure-classification latch.
/// `connect`/`close` are idempotent: calling `connect` while already
/// connected tears down the previous task first.
pub struct Signal {
    event_tx: EventSender,
    cmd_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Command>>>,
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    last_rtt_ms: AtomicI64,
    last_attempt_failed: AtomicBool,
    failure_reason: std::sync::Mutex<Option<FailureReason>>,
}

impl Signal {
    pub fn new(event_tx: EventSender) -> Arc<Self> {
        Arc::new(Self {
            event_tx,
            cmd_tx: std::sync::Mutex::new(None),
            task: std::sync::Mutex::new(None),
            last_rtt_ms: AtomicI64::new(0),
            last_attempt_failed: AtomicBool::new(false),
            failure_reason: std::sync::Mutex::new(None),
        })
    }

    /// Open a new signaling connection, tearing down any existing one first.
    /// `reconnect` threads through to the URL builder's `reconnect=true`
    /// query param.
    pub fn connect(self: &Arc<Self>, server_url: String, token: String, reconnect: bool) {
        self.teardown();
        self.event_tx.push(crate::event::Event::SigState {
            state: SignalState::Connecting,
        });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.cmd_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(cmd_tx);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run(server_url, token, reconnect, cmd_rx).await;
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Clean WebSocket close with a bounded timeout. Returns immediately if
    /// already closed.
    pub fn close(&self) {
        let had_connection = self
            .cmd_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| tx.send(Command::Close).is_ok())
            .unwrap_or(false);
        if !had_connection {
            return;
        }
        self.teardown();
    }

    fn teardown(&self) {
        *self.cmd_tx.lock().unwrap_or_else(|e| e.into_inner()) = None;
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    pub fn send_offer(&self, sdp: String) {
        self.send_command(Command::Offer(sdp));
    }

    pub fn send_answer(&self, sdp: String) {
        self.send_command(Command::Answer(sdp));
    }

    pub fn send_add_track(&self, req: AddTrackRequest) {
        self.send_command(Command::AddTrack(req));
    }

    pub fn send_update_subscription(&self, track_sid: String, subscribe: bool) {
        self.send_command(Command::UpdateSubscription(UpdateSubscription {
            track_sid,
            subscribe,
        }));
    }

    /// Send `reason = ClientInitiated`, `action = Disconnect` and wait for
    /// the request to actually reach the wire (or for there to be no
    /// connection to send it over). The caller bounds this with its own
    /// timeout before falling through to a hard close.
    pub async fn send_leave(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let sent = self
            .cmd_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| tx.send(Command::Leave(ack_tx)).is_ok())
            .unwrap_or(false);
        if sent {
            let _ = ack_rx.await;
        }
    }

    pub fn get_failure_reason(&self) -> Option<FailureReason> {
        *self.failure_reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_rtt_ms(&self) -> i64 {
        self.last_rtt_ms.load(Ordering::Relaxed)
    }

    fn send_command(&self, command: Command) {
        if let Some(tx) = self.cmd_tx.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = tx.send(command);
        }
    }

    async fn run(
        self: Arc<Self>,
        server_url: String,
        token: String,
        reconnect: bool,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let client_info = lk_protocol::url::ClientInfo::default();
        let url = match lk_protocol::url::build_signal_url(&server_url, &token, &client_info, reconnect)
        {
            Ok(url) => url,
            Err(e) => {
                warn!("invalid signaling url: {e}");
                self.last_attempt_failed.store(true, Ordering::Relaxed);
                self.event_tx.push(crate::event::Event::SigState {
                    state: SignalState::Failed(FailureReason::ClientOther),
                });
                return;
            }
        };

        let connect_result =
            tokio::time::timeout(NETWORK_TIMEOUT, tokio_tungstenite::connect_async(url.as_str()))
                .await;

        let ws_stream = match connect_result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => {
                let reason = classify_handshake_error(&err);
                warn!("signaling connect failed: {err}");
                *self.failure_reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
                self.last_attempt_failed.store(true, Ordering::Relaxed);
                self.event_tx.push(crate::event::Event::SigState {
                    state: SignalState::Failed(reason),
                });
                return;
            }
            Err(_) => {
                warn!("signaling connect timed out");
                *self.failure_reason.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(FailureReason::Unreachable);
                self.last_attempt_failed.store(true, Ordering::Relaxed);
                self.event_tx.push(crate::event::Event::SigState {
                    state: SignalState::Failed(FailureReason::Unreachable),
                });
                return;
            }
        };

        self.last_attempt_failed.store(false, Ordering::Relaxed);
        info!("signaling connected");
        self.event_tx.push(crate::event::Event::SigState {
            state: SignalState::Connected,
        });

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut ping_interval: Option<tokio::time::Interval> = None;
        let mut ping_timeout_secs: u32 = 0;
        let mut last_pong_at = tokio::time::Instant::now();
        let mut join_observed = false;

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Binary(bytes))) => {
                            let response = match lk_protocol::codec::decode_signal_response(&bytes) {
                                Ok(r) => r,
                                Err(e) => {
                                    warn!("dropping malformed signal response: {e}");
                                    continue;
                                }
                            };
                            if let Some(lk_protocol::wire::signal_response::Message::PongResp(pong)) =
                                &response.message
                            {
                                let now_ms = now_ms();
                                self.last_rtt_ms.store(
                                    now_ms - pong.last_ping_timestamp,
                                    Ordering::Relaxed,
                                );
                                last_pong_at = tokio::time::Instant::now();
                                continue;
                            }
                            if !join_observed {
                                if let Some(lk_protocol::wire::signal_response::Message::Join(join)) =
                                    &response.message
                                {
                                    join_observed = true;
                                    ping_timeout_secs = join.ping_timeout;
                                    if join.ping_interval > 0 {
                                        ping_interval =
                                            Some(interval(Duration::from_secs(join.ping_interval as u64)));
                                    }
                                }
                            }
                            self.event_tx.push(crate::event::Event::SigResponse { response });
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("signaling closed by peer");
                            self.event_tx.push(crate::event::Event::SigState {
                                state: SignalState::Disconnected,
                            });
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("signaling read error: {e}");
                            if !self.last_attempt_failed.swap(true, Ordering::Relaxed) {
                                self.event_tx.push(crate::event::Event::SigState {
                                    state: SignalState::Disconnected,
                                });
                            }
                            return;
                        }
                    }
                }
                _ = async {
                    if let Some(tick) = ping_interval.as_mut() {
                        tick.tick().await
                    } else {
                        std::future::pending().await
                    }
                }, if ping_interval.is_some() => {
                    if ping_timeout_secs > 0
                        && last_pong_at.elapsed() > Duration::from_secs(ping_timeout_secs as u64)
                    {
                        warn!("ping timeout, no pong received in time");
                        self.event_tx.push(crate::event::Event::SigState {
                            state: SignalState::Disconnected,
                        });
                        return;
                    }
                    let req = SignalRequest {
                        message: Some(signal_request::Message::PingReq(Ping {
                            timestamp: now_ms(),
                            rtt: self.last_rtt_ms.load(Ordering::Relaxed),
                        })),
                    };
                    if let Err(e) = send_request(&mut ws_tx, &req).await {
                        warn!("ping send failed: {e}");
                        return;
                    }
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return };
                    match cmd {
                        Command::Offer(sdp) => {
                            let req = SignalRequest {
                                message: Some(signal_request::Message::Offer(SessionDescription {
                                    r#type: "offer".to_string(),
                                    sdp,
                                })),
                            };
                            let _ = send_request(&mut ws_tx, &req).await;
                        }
                        Command::Answer(sdp) => {
                            let req = SignalRequest {
                                message: Some(signal_request::Message::Answer(SessionDescription {
                                    r#type: "answer".to_string(),
                                    sdp,
                                })),
                            };
                            let _ = send_request(&mut ws_tx, &req).await;
                        }
                        Command::AddTrack(add_track) => {
                            let req = SignalRequest {
                                message: Some(signal_request::Message::AddTrack(add_track)),
                            };
                            let _ = send_request(&mut ws_tx, &req).await;
                        }
                        Command::UpdateSubscription(sub) => {
                            let req = SignalRequest {
                                message: Some(signal_request::Message::Subscription(sub)),
                            };
                            let _ = send_request(&mut ws_tx, &req).await;
                        }
                        Command::Trickle(trickle) => {
                            let req = SignalRequest {
                                message: Some(signal_request::Message::Trickle(trickle)),
                            };
                            let _ = send_request(&mut ws_tx, &req).await;
                        }
                        Command::Leave(ack) => {
                            let req = SignalRequest {
                                message: Some(signal_request::Message::Leave(LeaveRequest {
                                    can_reconnect: false,
                                    reason: DisconnectReason::ClientInitiated as i32,
                                    action: LeaveAction::Disconnect as i32,
                                })),
                            };
                            let _ = send_request(&mut ws_tx, &req).await;
                            let _ = ack.send(());
                        }
                        Command::Close => {
                            let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_tx.close()).await;
                            return;
                        }
                    }
                }
            }
        }
    }
}

impl SignalOutbox for Signal {
    fn send_offer(&self, sdp: String) {
        Signal::send_offer(self, sdp);
    }

    fn send_answer(&self, sdp: String) {
        Signal::send_answer(self, sdp);
    }

    fn send_trickle(&self, candidate_json: String, target: SignalTarget) {
        self.send_command(Command::Trickle(TrickleRequest {
            candidate_init: candidate_json,
            target: target as i32,
        }));
    }
}

async fn send_request(
    ws_tx: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    request: &SignalRequest,
) -> Result<(), SignalError> {
    let bytes = lk_protocol::codec::encode_signal_request(request)?;
    ws_tx.send(Message::Binary(bytes)).await?;
    Ok(())
}

fn classify_handshake_error(err: &tokio_tungstenite::tungstenite::Error) -> FailureReason {
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            FailureReason::from_status(response.status().as_u16())
        }
        _ => FailureReason::Unreachable,
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
