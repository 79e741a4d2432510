//! Per-event `ClientEvent` handlers. Each handler owns exactly one
//! inbound signaling event type.

use std::sync::Arc;

use tracing::debug;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::Config;
use crate::error::SfuError;
use crate::message::{IceCandidatePayload, ServerEvent, StreamDecl};
use crate::pli;
use crate::registry::RoomRegistry;
use crate::room::Room;
use crate::session::ClientSession;
use crate::signaling::engine;

/// `offer`: first-time peer-connection creation or a client-initiated
/// renegotiation, distinguished by whether `session.peer_conn` is
/// already populated.
pub async fn handle_offer(
    session: &Arc<ClientSession>,
    room: &Arc<Room>,
    config: &Arc<Config>,
    registry: &Arc<RoomRegistry>,
    sdp: String,
    streams: Vec<StreamDecl>,
) -> Result<(), SfuError> {
    *session.streams.write().await = streams;

    let is_first_offer = session.peer_conn.read().await.is_none();
    let pc = if is_first_offer {
        engine::create_peer_connection(config, session, room, registry).await?
    } else {
        session
            .peer_conn
            .read()
            .await
            .clone()
            .ok_or_else(|| SfuError::Internal("peer connection vanished mid-offer".into()))?
    };

    let offer = RTCSessionDescription::offer(sdp).map_err(SfuError::from)?;
    pc.set_remote_description(offer).await.map_err(SfuError::from)?;

    let answer = pc.create_answer(None).await.map_err(SfuError::from)?;
    pc.set_local_description(answer.clone())
        .await
        .map_err(SfuError::from)?;

    session.safe_send(
        ServerEvent::Answer {
            sdp: serde_json::json!({ "type": "answer", "sdp": answer.sdp }),
        }
        .into_message(&session.room_id),
    );

    debug!(
        user_id = %session.user_id,
        first_offer = is_first_offer,
        "answered offer",
    );
    Ok(())
}

/// `answer`: apply a remote answer to an existing peer connection,
/// whether it closes the first offer/answer exchange or an
/// SFU-initiated renegotiation.
pub async fn handle_answer(session: &Arc<ClientSession>, sdp: String) -> Result<(), SfuError> {
    engine::handle_answer(session, sdp).await
}

/// `ice-candidate`: add a trickled ICE candidate to the session's peer
/// connection. Requires a peer connection to already exist.
pub async fn handle_ice_candidate(
    session: &Arc<ClientSession>,
    candidate: IceCandidatePayload,
) -> Result<(), SfuError> {
    let Some(pc) = session.peer_conn.read().await.clone() else {
        return Err(SfuError::Sdp(
            "ice-candidate received before peer connection exists".into(),
        ));
    };
    let init = RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: Some(candidate.sdp_mid),
        sdp_mline_index: Some(candidate.sdp_mline_index),
        username_fragment: None,
    };
    pc.add_ice_candidate(init).await.map_err(SfuError::from)
}

/// `switch-camera-micro`: update the sender's device state and rebroadcast
/// to the room, mutating the `ClientSession` already handed to this
/// dispatch call rather than re-looking it up in the room map.
pub async fn handle_switch_camera_micro(
    session: &Arc<ClientSession>,
    room: &Arc<Room>,
    cam_state: bool,
    mic_state: bool,
) -> Result<(), SfuError> {
    *session.cam_on.write().await = cam_state;
    *session.mic_on.write().await = mic_state;

    room.broadcast(ServerEvent::SwitchCameraMicro {
        user_id: session.user_id.clone(),
        cam_state,
        mic_state,
    });
    Ok(())
}

/// `request-pli`: issue an immediate PLI on the requesting client's own
/// peer connection, rather than the usual edge-triggered ~1s room sweep.
pub async fn handle_request_pli(session: &Arc<ClientSession>) -> Result<(), SfuError> {
    pli::sweep_now(session).await;
    Ok(())
}

/// `start-share`: rebroadcast to every other participant.
pub async fn handle_start_share(
    session: &Arc<ClientSession>,
    room: &Arc<Room>,
) -> Result<(), SfuError> {
    room.broadcast(ServerEvent::StartShare {
        user_id: session.user_id.clone(),
    });
    Ok(())
}

/// `stop-share`: rebroadcast to every other participant.
pub async fn handle_stop_share(
    session: &Arc<ClientSession>,
    room: &Arc<Room>,
) -> Result<(), SfuError> {
    room.broadcast(ServerEvent::StopShare {
        user_id: session.user_id.clone(),
    });
    Ok(())
}
