//! The engine's state machine, expressed as a pure function.
//!
//! `reduce(state, event) -> (state, actions)` takes no lock and touches no
//! transport: every side effect a state handler needs (open a socket, spawn
//! a peer, start a timer) is instead named as an [`Action`] for
//! [`crate::engine::Engine`] to execute. A callback-per-state handler
//! doesn't give you a function you can feed a thousand events to in a unit
//! test without a real WebRTC stack, so the state machine is factored out
//! as data in, actions out.

use lk_protocol::wire::{
    signal_response, ClientConfigSetting, IceServer, JoinResponse, LeaveAction, ParticipantInfo,
    Room, SignalTarget,
};

use crate::error::FailureReason;
use crate::event::{Event, PeerTarget, SignalState};
use crate::peer::PeerState;
use crate::track::{AudioTrackDescription, VideoTrackDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// Connection state observed by users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalState {
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
    Failed,
}

/// Project the internal phase onto the external state surface.
pub fn external_state(phase: Phase, retry_count: u32) -> ExternalState {
    match phase {
        Phase::Disconnected => ExternalState::Disconnected,
        Phase::Connecting if retry_count == 0 => ExternalState::Connecting,
        Phase::Connecting => ExternalState::Reconnecting,
        Phase::Backoff => ExternalState::Reconnecting,
        Phase::Connected => ExternalState::Connected,
    }
}

#[derive(Debug, Clone)]
pub struct EngineState {
    pub phase: Phase,
    pub server_url: String,
    pub token: String,
    pub retry_count: u32,
    pub subscriber_primary: bool,
    pub force_relay: bool,
    pub local_participant_sid: String,
    /// ICE servers handed down in the join response; empty means the engine
    /// falls back to its configured default STUN/TURN set.
    pub ice_servers: Vec<IceServer>,
    /// Set once, right before reporting `Disconnected` after exhausting the
    /// retry budget, so the engine can tell the user-visible `Failed`
    /// projection apart from a plain idle `Disconnected`.
    pub reached_max_retries: bool,
    /// Set by `CmdClose` and consumed the moment `Disconnected._StateEnter`
    /// runs, so a client-initiated close sends `Leave` before tearing down
    /// the signal connection while a server-initiated `Leave` or a
    /// retries-exhausted backoff does not try to send one back.
    pub close_requested: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            phase: Phase::Disconnected,
            server_url: String::new(),
            token: String::new(),
            retry_count: 0,
            subscriber_primary: false,
            force_relay: false,
            local_participant_sid: String::new(),
            ice_servers: Vec::new(),
            reached_max_retries: false,
            close_requested: false,
        }
    }
}

/// Side effects the reducer asks [`crate::engine::Engine`] to perform.
#[derive(Debug)]
pub enum Action {
    ConnectSignal { server_url: String, token: String, reconnect: bool },
    CloseSignal,
    SendLeave,
    CreatePeers,
    DestroyPeers,
    RouteSdpToPublisher { sdp_type: &'static str, sdp: String },
    RouteSdpToSubscriber { sdp_type: &'static str, sdp: String },
    RouteIceCandidate { target: PeerTarget, candidate: String },
    PublishTracks,
    StopMediaStreaming,
    StartBackoffTimer { delay_attempt: u32 },
    StopBackoffTimer,
    EnqueueMaxRetriesReached,
    EmitExternalState(ExternalState),
    ForwardRoomInfo(Room),
    ForwardParticipantInfo { info: ParticipantInfo, is_local: bool },
    ForwardDataPacket(lk_protocol::wire::DataPacket),
}

/// Process one event against `state`, returning the (possibly unchanged)
/// next state and the actions the engine task must perform.
pub fn reduce(mut state: EngineState, event: Event, max_retries: u32) -> (EngineState, Vec<Action>) {
    let old_phase = state.phase;
    let mut actions = Vec::new();

    match state.phase {
        Phase::Disconnected => handle_disconnected(&mut state, event, &mut actions),
        Phase::Connecting => handle_connecting(&mut state, event, &mut actions),
        Phase::Connected => handle_connected(&mut state, event, &mut actions),
        Phase::Backoff => handle_backoff(&mut state, event, &mut actions, max_retries),
    }

    if state.phase != old_phase {
        if old_phase == Phase::Backoff {
            actions.push(Action::StopBackoffTimer);
        }
        run_state_enter(&mut state, &mut actions);
        actions.push(Action::EmitExternalState(external_state(
            state.phase,
            state.retry_count,
        )));
    }

    (state, actions)
}

fn run_state_enter(state: &mut EngineState, actions: &mut Vec<Action>) {
    match state.phase {
        Phase::Disconnected => {
            actions.push(Action::StopMediaStreaming);
            if state.close_requested {
                actions.push(Action::SendLeave);
            }
            actions.push(Action::CloseSignal);
            actions.push(Action::DestroyPeers);
            state.subscriber_primary = false;
            state.force_relay = false;
            state.local_participant_sid.clear();
            state.retry_count = 0;
            state.close_requested = false;
        }
        Phase::Connecting => {
            actions.push(Action::ConnectSignal {
                server_url: state.server_url.clone(),
                token: state.token.clone(),
                reconnect: state.retry_count > 0,
            });
        }
        Phase::Connected => {
            state.retry_count = 0;
            actions.push(Action::PublishTracks);
        }
        Phase::Backoff => {
            actions.push(Action::StopMediaStreaming);
            actions.push(Action::CloseSignal);
            actions.push(Action::DestroyPeers);
            state.retry_count += 1;
            if state.retry_count >= max_retries {
                actions.push(Action::EnqueueMaxRetriesReached);
            } else {
                actions.push(Action::StartBackoffTimer {
                    delay_attempt: state.retry_count,
                });
            }
        }
    }
}

fn handle_disconnected(state: &mut EngineState, event: Event, _actions: &mut [Action]) {
    if let Event::CmdConnect { server_url, token } = event {
        state.server_url = server_url;
        state.token = token;
        state.phase = Phase::Connecting;
    }
}

fn handle_connecting(state: &mut EngineState, event: Event, actions: &mut Vec<Action>) {
    match event {
        Event::CmdClose => {
            state.close_requested = true;
            state.phase = Phase::Disconnected;
        }
        Event::CmdConnect { .. } => {
            tracing::debug!("CmdConnect ignored while already connecting");
        }
        Event::SigResponse { response } => handle_sig_response(state, response, actions, true),
        Event::SigState { state: sig_state } => match sig_state {
            SignalState::Failed(_) | SignalState::Disconnected => {
                state.phase = Phase::Backoff;
            }
            _ => {}
        },
        Event::PeerPubState { state: peer_state } => {
            if peer_state == PeerState::Connected && !state.subscriber_primary {
                state.phase = Phase::Connected;
            } else if matches!(peer_state, PeerState::Failed | PeerState::Disconnected) {
                state.phase = Phase::Backoff;
            }
        }
        Event::PeerSubState { state: peer_state } => {
            if peer_state == PeerState::Connected && state.subscriber_primary {
                state.phase = Phase::Connected;
            } else if matches!(peer_state, PeerState::Failed | PeerState::Disconnected) {
                state.phase = Phase::Backoff;
            }
        }
        _ => {}
    }
}

fn handle_connected(state: &mut EngineState, event: Event, actions: &mut Vec<Action>) {
    match event {
        Event::CmdClose => {
            state.close_requested = true;
            state.phase = Phase::Disconnected;
        }
        Event::PeerDataPacket { packet } => {
            actions.push(Action::ForwardDataPacket(packet.packet));
        }
        Event::SigResponse { response } => handle_sig_response(state, response, actions, false),
        Event::SigState { state: sig_state } => {
            if matches!(sig_state, SignalState::Failed(_) | SignalState::Disconnected) {
                state.phase = Phase::Backoff;
            }
        }
        Event::PeerPubState { state: peer_state } | Event::PeerSubState { state: peer_state } => {
            if matches!(peer_state, PeerState::Failed | PeerState::Disconnected) {
                state.phase = Phase::Backoff;
            }
        }
        _ => {}
    }
}

fn handle_backoff(state: &mut EngineState, event: Event, _actions: &mut [Action], _max_retries: u32) {
    match event {
        Event::MaxRetriesReached => {
            state.reached_max_retries = true;
            state.phase = Phase::Disconnected;
        }
        Event::TimerExpired => {
            state.phase = Phase::Connecting;
        }
        Event::CmdClose => {
            state.close_requested = true;
            state.phase = Phase::Disconnected;
        }
        _ => {}
    }
}

fn handle_sig_response(
    state: &mut EngineState,
    response: lk_protocol::wire::SignalResponse,
    actions: &mut Vec<Action>,
    in_connecting: bool,
) {
    let Some(message) = response.message else {
        return;
    };
    match message {
        signal_response::Message::Leave(leave) => {
            match LeaveAction::try_from(leave.action).unwrap_or(LeaveAction::Disconnect) {
                LeaveAction::Disconnect => state.phase = Phase::Disconnected,
                // Treated as a lost connection regardless of phase: the
                // server wants the client to re-establish, not stay down.
                LeaveAction::Reconnect | LeaveAction::Resume => state.phase = Phase::Backoff,
            }
        }
        signal_response::Message::Join(join) => apply_join(state, join, actions),
        signal_response::Message::Answer(sdp) => {
            actions.push(Action::RouteSdpToPublisher {
                sdp_type: "answer",
                sdp: sdp.sdp,
            });
        }
        signal_response::Message::Offer(sdp) => {
            actions.push(Action::RouteSdpToSubscriber {
                sdp_type: "offer",
                sdp: sdp.sdp,
            });
        }
        signal_response::Message::Trickle(trickle) => {
            if let Ok(candidate) = lk_protocol::codec::trickle_get_candidate(&trickle) {
                let target = match SignalTarget::try_from(trickle.target)
                    .unwrap_or(SignalTarget::Publisher)
                {
                    SignalTarget::Publisher => PeerTarget::Publisher,
                    SignalTarget::Subscriber => PeerTarget::Subscriber,
                };
                actions.push(Action::RouteIceCandidate { target, candidate });
            }
        }
        signal_response::Message::RoomUpdate(update) => {
            if !in_connecting {
                if let Some(room) = update.room {
                    actions.push(Action::ForwardRoomInfo(room));
                }
            }
        }
        signal_response::Message::ParticipantUpdate(update) => {
            if !in_connecting {
                let mut matched_local = false;
                for info in update.participants {
                    let is_local = !matched_local && info.sid == state.local_participant_sid;
                    if is_local {
                        matched_local = true;
                    }
                    actions.push(Action::ForwardParticipantInfo { info, is_local });
                }
            }
        }
        signal_response::Message::PongResp(_) => {}
    }
}

fn apply_join(state: &mut EngineState, join: JoinResponse, actions: &mut Vec<Action>) {
    state.subscriber_primary = join.subscriber_primary;
    state.force_relay = join
        .client_configuration
        .map(|c| ClientConfigSetting::try_from(c.force_relay) == Ok(ClientConfigSetting::Enabled))
        .unwrap_or(false);
    state.local_participant_sid = join.participant.map(|p| p.sid).unwrap_or_default();
    state.ice_servers = join.ice_servers;
    actions.push(Action::CreatePeers);
}

/// Build the `AddTrackRequest`s for `publish_tracks()`: a no-op when
/// neither track is configured.
pub fn publish_track_requests(
    audio: Option<AudioTrackDescription>,
    video: Option<VideoTrackDescription>,
) -> Vec<lk_protocol::wire::AddTrackRequest> {
    let mut out = Vec::new();
    if let Some(audio) = audio {
        out.push(audio.into_add_track_request());
    }
    if let Some(video) = video {
        out.push(video.into_add_track_request());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_event() -> Event {
        Event::CmdConnect {
            server_url: "wss://host".to_string(),
            token: "tok".to_string(),
        }
    }

    #[test]
    fn happy_path_reaches_connected() {
        let state = EngineState::default();
        let (state, actions) = reduce(state, connect_event(), 3);
        assert_eq!(state.phase, Phase::Connecting);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ConnectSignal { .. })));

        let join = lk_protocol::wire::SignalResponse {
            message: Some(signal_response::Message::Join(JoinResponse {
                subscriber_primary: false,
                participant: Some(ParticipantInfo {
                    sid: "P".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            })),
        };
        let (state, actions) = reduce(state, Event::SigResponse { response: join }, 3);
        assert_eq!(state.phase, Phase::Connecting);
        assert_eq!(state.local_participant_sid, "P");
        assert!(actions.iter().any(|a| matches!(a, Action::CreatePeers)));

        let (state, actions) = reduce(
            state,
            Event::PeerPubState {
                state: PeerState::Connected,
            },
            3,
        );
        assert_eq!(state.phase, Phase::Connected);
        assert_eq!(state.retry_count, 0);
        assert!(actions.iter().any(|a| matches!(a, Action::PublishTracks)));
    }

    #[test]
    fn failed_signaling_goes_to_backoff_then_retries() {
        let state = EngineState::default();
        let (state, _) = reduce(state, connect_event(), 3);
        let (state, actions) = reduce(
            state,
            Event::SigState {
                state: SignalState::Failed(FailureReason::Unauthorized),
            },
            3,
        );
        assert_eq!(state.phase, Phase::Backoff);
        assert_eq!(state.retry_count, 1);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartBackoffTimer { delay_attempt: 1 })));

        let (state, actions) = reduce(state, Event::TimerExpired, 3);
        assert_eq!(state.phase, Phase::Connecting);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ConnectSignal { reconnect: true, .. })));
    }

    #[test]
    fn max_retries_lands_on_disconnected_with_failed_flag() {
        let mut state = EngineState::default();
        state.phase = Phase::Backoff;
        state.retry_count = 2;
        let (state, actions) = reduce(state, Event::MaxRetriesReached, 3);
        assert_eq!(state.phase, Phase::Disconnected);
        assert!(state.reached_max_retries);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::EmitExternalState(ExternalState::Disconnected))));
    }

    #[test]
    fn server_leave_reconnect_in_connected_goes_to_backoff() {
        let mut state = EngineState::default();
        state.phase = Phase::Connected;
        let leave = lk_protocol::wire::SignalResponse {
            message: Some(signal_response::Message::Leave(
                lk_protocol::wire::LeaveRequest {
                    can_reconnect: true,
                    reason: 0,
                    action: LeaveAction::Reconnect as i32,
                },
            )),
        };
        let (state, _) = reduce(state, Event::SigResponse { response: leave }, 3);
        assert_eq!(state.phase, Phase::Backoff);
    }

    #[test]
    fn server_leave_disconnect_in_connected_is_terminal() {
        let mut state = EngineState::default();
        state.phase = Phase::Connected;
        let leave = lk_protocol::wire::SignalResponse {
            message: Some(signal_response::Message::Leave(
                lk_protocol::wire::LeaveRequest {
                    can_reconnect: false,
                    reason: 0,
                    action: LeaveAction::Disconnect as i32,
                },
            )),
        };
        let (state, _) = reduce(state, Event::SigResponse { response: leave }, 3);
        assert_eq!(state.phase, Phase::Disconnected);
    }

    #[test]
    fn cmd_close_from_connected_disconnects() {
        let mut state = EngineState::default();
        state.phase = Phase::Connected;
        let (state, actions) = reduce(state, Event::CmdClose, 3);
        assert_eq!(state.phase, Phase::Disconnected);
        assert!(actions.iter().any(|a| matches!(a, Action::DestroyPeers)));
    }

    #[test]
    fn cmd_close_sends_leave_before_closing_signal() {
        let mut state = EngineState::default();
        state.phase = Phase::Connected;
        let (state, actions) = reduce(state, Event::CmdClose, 3);
        assert_eq!(state.phase, Phase::Disconnected);
        assert!(!state.close_requested);
        let leave_pos = actions.iter().position(|a| matches!(a, Action::SendLeave));
        let close_pos = actions.iter().position(|a| matches!(a, Action::CloseSignal));
        assert!(leave_pos.is_some() && close_pos.is_some());
        assert!(leave_pos.unwrap() < close_pos.unwrap());
    }

    #[test]
    fn server_leave_does_not_send_leave_back() {
        let mut state = EngineState::default();
        state.phase = Phase::Connected;
        let leave = lk_protocol::wire::SignalResponse {
            message: Some(signal_response::Message::Leave(
                lk_protocol::wire::LeaveRequest {
                    can_reconnect: false,
                    reason: 0,
                    action: LeaveAction::Disconnect as i32,
                },
            )),
        };
        let (state, actions) = reduce(state, Event::SigResponse { response: leave }, 3);
        assert_eq!(state.phase, Phase::Disconnected);
        assert!(!actions.iter().any(|a| matches!(a, Action::SendLeave)));
    }

    #[test]
    fn server_leave_reconnect_while_connecting_goes_to_backoff() {
        let state = EngineState::default();
        let (state, _) = reduce(state, connect_event(), 3);
        assert_eq!(state.phase, Phase::Connecting);
        let leave = lk_protocol::wire::SignalResponse {
            message: Some(signal_response::Message::Leave(
                lk_protocol::wire::LeaveRequest {
                    can_reconnect: true,
                    reason: 0,
                    action: LeaveAction::Reconnect as i32,
                },
            )),
        };
        let (state, _) = reduce(state, Event::SigResponse { response: leave }, 3);
        assert_eq!(state.phase, Phase::Backoff);
    }

    #[test]
    fn external_projection_matches_phase_table() {
        assert_eq!(
            external_state(Phase::Disconnected, 0),
            ExternalState::Disconnected
        );
        assert_eq!(external_state(Phase::Connecting, 0), ExternalState::Connecting);
        assert_eq!(
            external_state(Phase::Connecting, 2),
            ExternalState::Reconnecting
        );
        assert_eq!(external_state(Phase::Backoff, 1), ExternalState::Reconnecting);
        assert_eq!(external_state(Phase::Connected, 0), ExternalState::Connected);
    }
}
