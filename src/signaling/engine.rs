//! Peer-connection construction and renegotiation.
//!
//! Codec registration uses `MediaEngine::register_default_codecs` — see
//! DESIGN.md for the rationale.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use crate::config::Config;
use crate::error::SfuError;
use crate::message::ServerEvent;
use crate::pli;
use crate::registry::RoomRegistry;
use crate::room::Room;
use crate::session::ClientSession;
use crate::track;

/// Build the ICE server list injected into every new peer connection:
/// one STUN entry and, if configured, one TURN entry with credentials.
fn ice_servers(config: &Config) -> Vec<RTCIceServer> {
    let mut servers = vec![RTCIceServer {
        urls: vec![config.stun_server.clone()],
        ..Default::default()
    }];
    if let Some(turn_url) = &config.turn_server {
        servers.push(RTCIceServer {
            urls: vec![turn_url.clone()],
            username: config.turn_username.clone().unwrap_or_default(),
            credential: config.turn_credential.clone().unwrap_or_default(),
            ..Default::default()
        });
    }
    servers
}

/// Construct a peer connection for `session` and wire every event
/// handler it needs for the session's lifetime: track fan-in, trickle
/// ICE relay, connection-state driven teardown/PLI, and signaling-state
/// driven renegotiation unblocking.
pub async fn create_peer_connection(
    config: &Config,
    session: &Arc<ClientSession>,
    room: &Arc<Room>,
    registry: &Arc<RoomRegistry>,
) -> Result<Arc<RTCPeerConnection>, SfuError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(SfuError::from)?;

    let mut interceptor_registry = Registry::new();
    interceptor_registry = register_default_interceptors(interceptor_registry, &mut media_engine)
        .map_err(SfuError::from)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: ice_servers(config),
        ..Default::default()
    };

    let pc = Arc::new(
        api.new_peer_connection(rtc_config)
            .await
            .map_err(SfuError::from)?,
    );

    setup_track_handler(&pc, Arc::clone(session), Arc::clone(room));
    setup_ice_candidate_handler(&pc, Arc::clone(session));
    setup_connection_state_handler(&pc, Arc::clone(session), Arc::clone(room), Arc::clone(registry));
    setup_signaling_state_handler(&pc, Arc::clone(session));
    setup_ice_connection_state_handler(&pc, Arc::clone(room));

    *session.peer_conn.write().await = Some(Arc::clone(&pc));

    pli::spawn_periodic(Arc::clone(room), session.cancel.clone());

    Ok(pc)
}

/// Late admission: for each other client in the room with forwarded
/// tracks already present, notify the late joiner of each track and
/// attach it to the late joiner's peer connection, then emit the
/// one-shot roster. Runs at most once per session, guarded by
/// [`ClientSession::mark_late_admitted`], so a peer connection that
/// flaps through `Connected` more than once never double-attaches.
///
/// A room with no other participants yet performs no fan-out and emits
/// no roster at all.
pub async fn late_admission(session: &Arc<ClientSession>, room: &Arc<Room>) {
    if session.mark_late_admitted() {
        return;
    }

    let Some(pc) = session.peer_conn.read().await.clone() else {
        return;
    };

    let others: Vec<Arc<ClientSession>> = {
        let clients = room.clients.read().await;
        clients
            .values()
            .filter(|c| c.user_id != session.user_id)
            .cloned()
            .collect()
    };

    if others.is_empty() {
        return;
    }

    let mut attached_any = false;
    let mut users = Vec::with_capacity(others.len());

    for other in &others {
        users.push(crate::message::UserState {
            user_id: other.user_id.clone(),
            cam_state: *other.cam_on.read().await,
            mic_state: *other.mic_on.read().await,
        });

        for (kind, slot) in [
            (crate::message::TrackKind::Audio, &other.audio_track),
            (crate::message::TrackKind::Video, &other.video_track),
            (crate::message::TrackKind::Screen, &other.screen_track),
        ] {
            let Some(local) = slot.read().await.clone() else {
                continue;
            };

            session.safe_send(
                ServerEvent::NewStream {
                    user_id: other.user_id.clone(),
                    kind,
                    track_id: local.id(),
                    stream_id: local.stream_id(),
                }
                .into_message(&room.id),
            );

            match pc.add_track(Arc::clone(&local) as _).await {
                Ok(_sender) => attached_any = true,
                Err(err) => {
                    warn!(
                        late_joiner = %session.user_id,
                        publisher = %other.user_id,
                        %err,
                        "failed to attach existing track during late admission, skipping this track",
                    );
                }
            }
        }
    }

    session.safe_send(ServerEvent::GetAllUserStates { users }.into_message(&room.id));

    if attached_any {
        renegotiate(session).await;
    }

    pli::schedule_edge_triggered(Arc::clone(room));
}

fn setup_track_handler(pc: &Arc<RTCPeerConnection>, session: Arc<ClientSession>, room: Arc<Room>) {
    pc.on_track(Box::new(move |remote, _receiver, _transceiver| {
        let session = Arc::clone(&session);
        let room = Arc::clone(&room);
        Box::pin(async move {
            let Some(kind) = track::resolve_kind(&session, &remote.id()).await else {
                return;
            };
            let local = match track::bind_local_track(&session, &remote, kind).await {
                Ok(local) => local,
                Err(err) => {
                    warn!(user_id = %session.user_id, %err, "failed to create local forwarding track");
                    return;
                }
            };
            let track_id = remote.id();
            track::spawn_rtp_forwarder(Arc::clone(&session), Arc::clone(&remote), Arc::clone(&local));
            track::fan_out_new_track(&room, &session, kind, track_id, local).await;
            pli::schedule_edge_triggered(Arc::clone(&room));
        })
    }));
}

fn setup_ice_candidate_handler(pc: &Arc<RTCPeerConnection>, session: Arc<ClientSession>) {
    pc.on_ice_candidate(Box::new(move |candidate| {
        let session = Arc::clone(&session);
        Box::pin(async move {
            let Some(candidate) = candidate else { return };
            let init = match candidate.to_json() {
                Ok(init) => init,
                Err(err) => {
                    warn!(%err, "failed to serialize ICE candidate");
                    return;
                }
            };
            let candidate_json = serde_json::to_value(init).unwrap_or_default();
            session.safe_send(
                ServerEvent::IceCandidate {
                    candidate: candidate_json,
                }
                .into_message(&session.room_id),
            );
        })
    }));
}

fn setup_connection_state_handler(
    pc: &Arc<RTCPeerConnection>,
    session: Arc<ClientSession>,
    room: Arc<Room>,
    registry: Arc<RoomRegistry>,
) {
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let session = Arc::clone(&session);
        let room = Arc::clone(&room);
        let registry = Arc::clone(&registry);
        Box::pin(async move {
            info!(user_id = %session.user_id, ?state, "peer connection state changed");
            match state {
                RTCPeerConnectionState::Connected => {
                    late_admission(&session, &room).await;
                    pli::schedule_edge_triggered(Arc::clone(&room));
                }
                RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed
                | RTCPeerConnectionState::Disconnected => {
                    session.teardown().await;
                    room.evict(&session.user_id).await;
                    registry.remove_if_empty(&session.room_id).await;
                }
                _ => {}
            }
        })
    }));
}

fn setup_signaling_state_handler(pc: &Arc<RTCPeerConnection>, session: Arc<ClientSession>) {
    pc.on_signaling_state_change(Box::new(move |state| {
        let session = Arc::clone(&session);
        Box::pin(async move {
            if state == RTCSignalingState::Stable {
                session.stable.notify_waiters();
            }
        })
    }));
}

fn setup_ice_connection_state_handler(pc: &Arc<RTCPeerConnection>, room: Arc<Room>) {
    pc.on_ice_connection_state_change(Box::new(move |state| {
        let room = Arc::clone(&room);
        Box::pin(async move {
            if matches!(
                state,
                RTCIceConnectionState::Connected | RTCIceConnectionState::Completed
            ) {
                pli::schedule_edge_triggered(Arc::clone(&room));
            }
        })
    }));
}

/// Upper bound on how long `renegotiate` waits for the signaling state
/// to settle to `Stable` before giving up.
const STABLE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// SFU-initiated renegotiation: wait for any in-flight negotiation to
/// settle, then create and send a fresh offer. Used after attaching a
/// newly forwarded track to an existing participant's connection.
///
/// Precondition (§4.4.4): the target's connection state must be
/// `Connected`. A peer still completing ICE/DTLS cannot usefully receive
/// an offer, so renegotiation is skipped rather than attempted.
///
/// If the signaling state never reaches `Stable` within the timeout, the
/// attempt is abandoned (logged) without tearing down the session — a
/// later event may successfully trigger another renegotiation.
pub async fn renegotiate(session: &Arc<ClientSession>) {
    let Some(pc) = session.peer_conn.read().await.clone() else {
        return;
    };

    if pc.connection_state() != RTCPeerConnectionState::Connected {
        debug!(user_id = %session.user_id, "skipping renegotiation, connection not yet Connected");
        return;
    }

    if pc.signaling_state() != RTCSignalingState::Stable {
        // Register interest before checking the state again: `notified()`
        // records a waiter at creation time, so a `notify_waiters()` call
        // racing between the state check above and the `.await` below is
        // never missed (the same pattern as `ClientSession::wait_done`).
        let notified = session.stable.notified();
        if pc.signaling_state() != RTCSignalingState::Stable {
            if tokio::time::timeout(STABLE_WAIT_TIMEOUT, notified)
                .await
                .is_err()
            {
                warn!(user_id = %session.user_id, "timed out waiting for stable signaling state, skipping renegotiation");
                return;
            }
        }
    }

    let offer = match pc.create_offer(None).await {
        Ok(offer) => offer,
        Err(err) => {
            warn!(user_id = %session.user_id, %err, "failed to create renegotiation offer");
            return;
        }
    };
    if let Err(err) = pc.set_local_description(offer.clone()).await {
        warn!(user_id = %session.user_id, %err, "failed to set local description for renegotiation");
        return;
    }

    session.safe_send(
        ServerEvent::Offer { sdp: offer.sdp }.into_message(&session.room_id),
    );
    debug!(user_id = %session.user_id, "sent renegotiation offer");
}

/// Apply a remote answer to a pending renegotiation.
pub async fn handle_answer(
    session: &Arc<ClientSession>,
    sdp: String,
) -> Result<(), SfuError> {
    let Some(pc) = session.peer_conn.read().await.clone() else {
        return Err(SfuError::Sdp("answer received before peer connection exists".into()));
    };
    let answer = RTCSessionDescription::answer(sdp).map_err(SfuError::from)?;
    pc.set_remote_description(answer).await.map_err(SfuError::from)
}
