//! Signaling engine: peer-connection lifecycle and the per-event
//! dispatch table driving it.
//!
//! Split as `engine` (peer-connection construction, renegotiation, track
//! handlers) and `handlers` (the `ClientEvent` match arms).

pub mod engine;
pub mod handlers;

use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::message::{ClientEvent, Message};
use crate::registry::RoomRegistry;
use crate::session::ClientSession;

/// Decode and dispatch one inbound message for `session`. Errors are
/// logged with `user_id`/`room_id` context and never surfaced to the
/// client as a structured reply, per the error-handling design.
pub async fn dispatch(
    message: Message,
    session: &Arc<ClientSession>,
    registry: &Arc<RoomRegistry>,
    config: &Arc<Config>,
) {
    let event = match ClientEvent::decode(&message.event, &message.payload) {
        Ok(event) => event,
        Err(err) => {
            warn!(
                user_id = %session.user_id,
                room_id = %session.room_id,
                %err,
                "failed to decode inbound message",
            );
            return;
        }
    };

    let Some(room) = registry.get(&session.room_id).await else {
        warn!(
            user_id = %session.user_id,
            room_id = %session.room_id,
            "event for a room that no longer exists",
        );
        return;
    };

    let result = match event {
        ClientEvent::Offer { sdp, streams } => {
            handlers::handle_offer(session, &room, config, registry, sdp, streams).await
        }
        ClientEvent::Answer { sdp } => handlers::handle_answer(session, sdp).await,
        ClientEvent::IceCandidate { candidate } => {
            handlers::handle_ice_candidate(session, candidate).await
        }
        ClientEvent::SwitchCameraMicro {
            cam_state,
            mic_state,
        } => handlers::handle_switch_camera_micro(session, &room, cam_state, mic_state).await,
        ClientEvent::RequestPli => handlers::handle_request_pli(session).await,
        ClientEvent::StartShare => handlers::handle_start_share(session, &room).await,
        ClientEvent::StopShare => handlers::handle_stop_share(session, &room).await,
        ClientEvent::Unknown(tag) => {
            warn!(event = %tag, "unrecognized signaling event, dropping");
            Ok(())
        }
    };

    if let Err(err) = result {
        warn!(
            user_id = %session.user_id,
            room_id = %session.room_id,
            %err,
            "signaling event handler failed",
        );
    }
}
