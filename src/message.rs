//! The signaling message envelope and the typed event sets carried inside it.
//!
//! Inbound messages decode into a closed [`ClientEvent`] tagged union;
//! unknown `event` tags decode into [`ClientEvent::Unknown`] and are
//! dropped by the signaling engine (see the Design Note on free-form
//! payload typing). Outbound events are [`ServerEvent`], each mapped onto
//! the wire envelope's `event`/`payload` fields by [`ServerEvent::into_message`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The wire envelope: `{ event, userId, roomId, payload }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub event: String,
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(rename = "roomId", default)]
    pub room_id: String,
    #[serde(default)]
    pub payload: Value,
}

/// One entry of the `streams` array a client declares on every `offer`:
/// maps a local track id to its semantic role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamDecl {
    #[serde(rename = "trackId")]
    pub track_id: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
}

/// The semantic type of a forwarded track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
    Screen,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Screen => "screen",
        }
    }
}

/// An ICE candidate as carried in `ice-candidate` payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
}

/// Bootstrap payload fields required on the very first inbound message.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapPayload {
    pub role: String,
    #[serde(rename = "isCamOn")]
    pub is_cam_on: bool,
    #[serde(rename = "isMicOn")]
    pub is_mic_on: bool,
}

/// Closed set of inbound signaling events the engine dispatches on.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Offer {
        sdp: String,
        streams: Vec<StreamDecl>,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        candidate: IceCandidatePayload,
    },
    SwitchCameraMicro {
        cam_state: bool,
        mic_state: bool,
    },
    RequestPli,
    StartShare,
    StopShare,
    /// An `event` tag outside the closed set above; logged and dropped.
    Unknown(String),
}

impl ClientEvent {
    /// Decode a message's `event` tag and `payload` into a typed event.
    ///
    /// Returns `Err` only for malformed payloads on events that require a
    /// specific shape; an unrecognized `event` tag never errors, it decodes
    /// to [`ClientEvent::Unknown`].
    pub fn decode(event: &str, payload: &Value) -> Result<Self, crate::error::SfuError> {
        match event {
            "offer" => {
                let sdp = payload
                    .get("offer")
                    .and_then(|o| o.get("sdp"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        crate::error::SfuError::Protocol("offer missing payload.offer.sdp".into())
                    })?
                    .to_string();
                let streams = payload
                    .get("streams")
                    .cloned()
                    .map(serde_json::from_value::<Vec<StreamDecl>>)
                    .transpose()?
                    .unwrap_or_default();
                Ok(Self::Offer { sdp, streams })
            }
            "answer" => {
                let sdp = payload
                    .get("sdp")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        crate::error::SfuError::Protocol("answer missing payload.sdp".into())
                    })?
                    .to_string();
                Ok(Self::Answer { sdp })
            }
            "ice-candidate" => {
                let candidate = payload
                    .get("candidate")
                    .cloned()
                    .ok_or_else(|| {
                        crate::error::SfuError::Protocol(
                            "ice-candidate missing payload.candidate".into(),
                        )
                    })
                    .and_then(|c| {
                        serde_json::from_value(c).map_err(crate::error::SfuError::from)
                    })?;
                Ok(Self::IceCandidate { candidate })
            }
            "switch-camera-micro" => {
                let cam_state = payload
                    .get("camState")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| {
                        crate::error::SfuError::Protocol("missing payload.camState".into())
                    })?;
                let mic_state = payload
                    .get("micState")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| {
                        crate::error::SfuError::Protocol("missing payload.micState".into())
                    })?;
                Ok(Self::SwitchCameraMicro {
                    cam_state,
                    mic_state,
                })
            }
            "request-pli" => Ok(Self::RequestPli),
            "start-share" => Ok(Self::StartShare),
            "stop-share" => Ok(Self::StopShare),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

/// A roster entry for `get-all-user-states`.
#[derive(Debug, Clone, Serialize)]
pub struct UserState {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "camState")]
    pub cam_state: bool,
    #[serde(rename = "micState")]
    pub mic_state: bool,
}

/// Closed set of outbound signaling events.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Answer {
        sdp: Value,
    },
    Offer {
        sdp: String,
    },
    IceCandidate {
        candidate: Value,
    },
    UserJoin {
        user_id: String,
        cam_state: bool,
        mic_state: bool,
    },
    UserLeave {
        user_id: String,
    },
    NewStream {
        user_id: String,
        kind: TrackKind,
        track_id: String,
        stream_id: String,
    },
    SwitchCameraMicro {
        user_id: String,
        cam_state: bool,
        mic_state: bool,
    },
    StartShare {
        user_id: String,
    },
    StopShare {
        user_id: String,
    },
    GetAllUserStates {
        users: Vec<UserState>,
    },
}

impl ServerEvent {
    /// The wire `event` tag for this variant.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Answer { .. } => "answer",
            Self::Offer { .. } => "offer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::UserJoin { .. } => "user-join",
            Self::UserLeave { .. } => "user-leave",
            Self::NewStream { .. } => "new-stream",
            Self::SwitchCameraMicro { .. } => "switch-camera-micro",
            Self::StartShare { .. } => "start-share",
            Self::StopShare { .. } => "stop-share",
            Self::GetAllUserStates { .. } => "get-all-user-states",
        }
    }

    /// The user id this event is attributed to, if any (used for the
    /// envelope's `userId` field and for the room's sender-exclusion
    /// broadcast policy).
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::UserJoin { user_id, .. }
            | Self::UserLeave { user_id }
            | Self::NewStream { user_id, .. }
            | Self::SwitchCameraMicro { user_id, .. }
            | Self::StartShare { user_id }
            | Self::StopShare { user_id } => Some(user_id),
            Self::Answer { .. }
            | Self::Offer { .. }
            | Self::IceCandidate { .. }
            | Self::GetAllUserStates { .. } => None,
        }
    }

    /// Render the event's payload as its JSON wire shape.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Answer { sdp } => serde_json::json!({ "sdp": sdp }),
            Self::Offer { sdp } => serde_json::json!({ "sdp": sdp, "type": "offer" }),
            Self::IceCandidate { candidate } => serde_json::json!({ "candidate": candidate }),
            Self::UserJoin {
                cam_state,
                mic_state,
                ..
            } => serde_json::json!({ "camState": cam_state, "micState": mic_state }),
            Self::UserLeave { .. } => serde_json::json!({}),
            Self::NewStream {
                kind,
                track_id,
                stream_id,
                ..
            } => serde_json::json!({
                "type": kind.as_str(),
                "trackId": track_id,
                "streamId": stream_id,
            }),
            Self::SwitchCameraMicro {
                cam_state,
                mic_state,
                ..
            } => serde_json::json!({ "camState": cam_state, "micState": mic_state }),
            Self::StartShare { .. } | Self::StopShare { .. } => serde_json::json!({}),
            Self::GetAllUserStates { users } => serde_json::json!({ "users": users }),
        }
    }

    /// Build the wire envelope for this event, addressed to `room_id`.
    #[must_use]
    pub fn into_message(self, room_id: &str) -> Message {
        let event = self.tag().to_string();
        let user_id = self.user_id().unwrap_or_default().to_string();
        let payload = self.payload();
        Message {
            event,
            user_id,
            room_id: room_id.to_string(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_first_offer_with_streams() {
        let payload = serde_json::json!({
            "offer": { "sdp": "v=0..." },
            "streams": [{ "trackId": "at-A", "type": "audio" }],
        });
        let event = ClientEvent::decode("offer", &payload).unwrap();
        match event {
            ClientEvent::Offer { sdp, streams } => {
                assert_eq!(sdp, "v=0...");
                assert_eq!(streams.len(), 1);
                assert_eq!(streams[0].track_id, "at-A");
                assert_eq!(streams[0].kind, TrackKind::Audio);
            }
            other => panic!("expected Offer, got {other:?}"),
        }
    }

    #[test]
    fn offer_without_streams_defaults_to_empty() {
        let payload = serde_json::json!({ "offer": { "sdp": "v=0..." } });
        let event = ClientEvent::decode("offer", &payload).unwrap();
        match event {
            ClientEvent::Offer { streams, .. } => assert!(streams.is_empty()),
            other => panic!("expected Offer, got {other:?}"),
        }
    }

    #[test]
    fn offer_missing_sdp_is_a_protocol_error() {
        let payload = serde_json::json!({});
        assert!(ClientEvent::decode("offer", &payload).is_err());
    }

    #[test]
    fn decodes_switch_camera_micro() {
        let payload = serde_json::json!({ "camState": true, "micState": false });
        match ClientEvent::decode("switch-camera-micro", &payload).unwrap() {
            ClientEvent::SwitchCameraMicro {
                cam_state,
                mic_state,
            } => {
                assert!(cam_state);
                assert!(!mic_state);
            }
            other => panic!("expected SwitchCameraMicro, got {other:?}"),
        }
    }

    #[test]
    fn decodes_ice_candidate() {
        let payload = serde_json::json!({
            "candidate": { "candidate": "candidate:1 1 UDP ...", "sdpMid": "0", "sdpMLineIndex": 0 },
        });
        match ClientEvent::decode("ice-candidate", &payload).unwrap() {
            ClientEvent::IceCandidate { candidate } => {
                assert_eq!(candidate.sdp_mid, "0");
                assert_eq!(candidate.sdp_mline_index, 0);
            }
            other => panic!("expected IceCandidate, got {other:?}"),
        }
    }

    #[test]
    fn empty_payload_events_decode_with_no_fields() {
        let empty = serde_json::json!({});
        assert!(matches!(
            ClientEvent::decode("request-pli", &empty).unwrap(),
            ClientEvent::RequestPli
        ));
        assert!(matches!(
            ClientEvent::decode("start-share", &empty).unwrap(),
            ClientEvent::StartShare
        ));
        assert!(matches!(
            ClientEvent::decode("stop-share", &empty).unwrap(),
            ClientEvent::StopShare
        ));
    }

    #[test]
    fn unknown_event_tag_decodes_to_unknown_variant() {
        let event = ClientEvent::decode("some-future-event", &serde_json::json!({})).unwrap();
        assert!(matches!(event, ClientEvent::Unknown(tag) if tag == "some-future-event"));
    }

    #[test]
    fn user_leave_and_new_stream_wire_shapes() {
        let leave = ServerEvent::UserLeave {
            user_id: "A".into(),
        }
        .into_message("R");
        assert_eq!(leave.event, "user-leave");
        assert_eq!(leave.user_id, "A");
        assert_eq!(leave.payload, serde_json::json!({}));

        let new_stream = ServerEvent::NewStream {
            user_id: "B".into(),
            kind: TrackKind::Screen,
            track_id: "st-B".into(),
            stream_id: "B".into(),
        }
        .into_message("R");
        assert_eq!(new_stream.event, "new-stream");
        assert_eq!(
            new_stream.payload,
            serde_json::json!({ "type": "screen", "trackId": "st-B", "streamId": "B" })
        );
    }
}
