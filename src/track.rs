//! Resolves incoming remote tracks to their semantic kind and forwards
//! RTP packets to every other participant's peer connection.

use std::sync::Arc;

use tracing::{debug, warn};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

use crate::message::{ServerEvent, TrackKind};
use crate::room::Room;
use crate::session::ClientSession;

/// Resolve an incoming `TrackRemote`'s declared id against a publisher's
/// most recently announced `streams` list. Returns `None` if no
/// declaration matches, which is logged rather than silently dropped.
pub async fn resolve_kind(publisher: &ClientSession, track_id: &str) -> Option<TrackKind> {
    let streams = publisher.streams.read().await;
    let kind = streams
        .iter()
        .find(|decl| decl.track_id == track_id)
        .map(|decl| decl.kind);
    if kind.is_none() {
        warn!(
            user_id = %publisher.user_id,
            track_id,
            "incoming track id matches no declared stream, dropping",
        );
    }
    kind
}

/// Build the local forwarding track for a given remote track and kind,
/// and store it on the publisher's session so later fan-out (e.g. a late
/// joiner) can reuse the same local track instance.
///
/// Carries the remote track's own id and stream id forward rather than a
/// kind-derived placeholder, so a `new-stream` announcement's `trackId`
/// always names the track actually attached to peers' connections.
pub async fn bind_local_track(
    publisher: &ClientSession,
    remote: &Arc<TrackRemote>,
    kind: TrackKind,
) -> Result<Arc<TrackLocalStaticRTP>, crate::error::SfuError> {
    let local = Arc::new(TrackLocalStaticRTP::new(
        remote.codec().capability,
        remote.id(),
        remote.stream_id(),
    ));
    let slot = match kind {
        TrackKind::Audio => &publisher.audio_track,
        TrackKind::Video => &publisher.video_track,
        TrackKind::Screen => &publisher.screen_track,
    };
    *slot.write().await = Some(Arc::clone(&local));
    Ok(local)
}

/// Read RTP packets from `remote` and write them to `local` until either
/// side errs or the publisher's session tears down. Spawned once per
/// accepted remote track; does not itself retry or reconnect.
pub fn spawn_rtp_forwarder(
    publisher: Arc<ClientSession>,
    remote: Arc<TrackRemote>,
    local: Arc<TrackLocalStaticRTP>,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        loop {
            tokio::select! {
                () = publisher.wait_done() => break,
                result = remote.read(&mut buf) => {
                    let (packet, _) = match result {
                        Ok(v) => v,
                        Err(err) => {
                            debug!(user_id = %publisher.user_id, %err, "remote track read ended");
                            break;
                        }
                    };
                    if let Err(err) = local.write_rtp(&packet).await {
                        debug!(user_id = %publisher.user_id, %err, "local track write ended");
                        break;
                    }
                }
            }
        }
    });
}

/// Attach `local` to every other participant's peer connection, then
/// broadcast `new-stream` and `switch-camera-micro` for the publisher.
///
/// Collects attachment targets under the room's read lock (cheap,
/// non-suspending beyond `add_track` itself, which does not hold any
/// room lock internally) but performs the renegotiation that follows
/// outside the lock.
pub async fn fan_out_new_track(
    room: &Arc<Room>,
    publisher: &ClientSession,
    kind: TrackKind,
    track_id: String,
    local: Arc<TrackLocalStaticRTP>,
) {
    let targets: Vec<Arc<ClientSession>> = {
        let clients = room.clients.read().await;
        clients
            .values()
            .filter(|c| c.user_id != publisher.user_id)
            .cloned()
            .collect()
    };

    let mut to_renegotiate = Vec::new();
    for target in &targets {
        let Some(pc) = target.peer_conn.read().await.clone() else {
            continue;
        };
        match pc.add_track(Arc::clone(&local) as _).await {
            Ok(_sender) => to_renegotiate.push(Arc::clone(target)),
            Err(err) => {
                warn!(
                    publisher = %publisher.user_id,
                    target = %target.user_id,
                    %err,
                    "failed to attach forwarded track, skipping this peer",
                );
            }
        }
    }

    let cam_state = *publisher.cam_on.read().await;
    let mic_state = *publisher.mic_on.read().await;

    room.broadcast(ServerEvent::NewStream {
        user_id: publisher.user_id.clone(),
        kind,
        track_id: track_id.clone(),
        stream_id: publisher.user_id.clone(),
    });
    room.broadcast(ServerEvent::SwitchCameraMicro {
        user_id: publisher.user_id.clone(),
        cam_state,
        mic_state,
    });

    for target in to_renegotiate {
        crate::signaling::engine::renegotiate(&target).await;
    }
}

/// Only video and audio receivers take part in PLI sweeps.
#[must_use]
pub fn is_media(kind: RTPCodecType) -> bool {
    matches!(kind, RTPCodecType::Video | RTPCodecType::Audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StreamDecl;

    #[tokio::test]
    async fn resolve_kind_matches_declared_track_id() {
        let publisher = ClientSession::new("A".into(), "R".into(), "host".into(), false, true);
        *publisher.streams.write().await = vec![StreamDecl {
            track_id: "vt-A".into(),
            kind: TrackKind::Video,
        }];

        assert_eq!(
            resolve_kind(&publisher, "vt-A").await,
            Some(TrackKind::Video)
        );
    }

    #[tokio::test]
    async fn resolve_kind_returns_none_for_undeclared_track() {
        let publisher = ClientSession::new("A".into(), "R".into(), "host".into(), false, true);
        *publisher.streams.write().await = vec![StreamDecl {
            track_id: "vt-A".into(),
            kind: TrackKind::Video,
        }];

        assert_eq!(resolve_kind(&publisher, "unknown-track").await, None);
    }

    #[test]
    fn is_media_excludes_non_av_codec_types() {
        assert!(is_media(RTPCodecType::Audio));
        assert!(is_media(RTPCodecType::Video));
        assert!(!is_media(RTPCodecType::Unspecified));
    }
}
