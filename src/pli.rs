//! Picture Loss Indication scheduling.
//!
//! A PLI is issued to a publisher's peer connection on a periodic
//! ticker plus a handful of edge-triggered one-shots (connection up, ICE
//! up, late admission). The periodic and edge-triggered sweeps fan out to
//! every peer connection in the room via [`sweep_room`], which snapshots
//! participants under a read lock and issues RTCP outside it, so a slow
//! write never holds the room lock. An explicit `request-pli` from a
//! client instead targets only that client's own connection, via
//! [`sweep_now`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;

use crate::room::Room;
use crate::session::ClientSession;
use crate::track;

/// Periodic sweep interval.
const PERIODIC_INTERVAL: Duration = Duration::from_secs(3);

/// Delay before an edge-triggered sweep, giving a freshly attached
/// track time to start producing RTP before the first PLI lands.
const EDGE_TRIGGER_DELAY: Duration = Duration::from_secs(1);

/// Issue a Picture Loss Indication to every receiver of every
/// fully-connected participant in `room`.
///
/// Snapshots `(user_id, peer_connection)` pairs under the room's read
/// lock, drops the guard, then for each snapshot entry whose connection
/// and ICE state are both up, writes one `PictureLossIndication` per
/// active receiver's SSRC.
pub async fn sweep_room(room: &Arc<Room>) {
    let targets: Vec<Arc<RTCPeerConnection>> = {
        let clients = room.clients.read().await;
        let mut out = Vec::new();
        for session in clients.values() {
            if let Some(pc) = session.peer_conn.read().await.clone() {
                out.push(pc);
            }
        }
        out
    };

    for pc in targets {
        sweep_peer_connection(&pc).await;
    }
}

/// Issue a Picture Loss Indication to every receiver of a single peer
/// connection, if it is fully connected. Used for `request-pli`, which
/// targets only the requesting client's own connection (§4.4/§4.7).
pub async fn sweep_peer(pc: &Arc<RTCPeerConnection>) {
    sweep_peer_connection(pc).await;
}

async fn sweep_peer_connection(pc: &Arc<RTCPeerConnection>) {
    if pc.connection_state() != RTCPeerConnectionState::Connected {
        return;
    }
    if !matches!(
        pc.ice_connection_state(),
        webrtc::ice_transport::ice_connection_state::RTCIceConnectionState::Connected
            | webrtc::ice_transport::ice_connection_state::RTCIceConnectionState::Completed
    ) {
        return;
    }
    for receiver in pc.get_receivers().await {
        send_pli_for_receiver(pc, &receiver).await;
    }
}

async fn send_pli_for_receiver(pc: &Arc<RTCPeerConnection>, receiver: &RTCRtpReceiver) {
    let Some(track) = receiver.track().await else {
        return;
    };
    if !track::is_media(track.kind()) {
        return;
    }
    let ssrc = track.ssrc();
    let packet = PictureLossIndication {
        sender_ssrc: 0,
        media_ssrc: ssrc,
    };
    if let Err(err) = pc.write_rtcp(&[Box::new(packet)]).await {
        debug!(%err, ssrc, "failed to write PLI, receiver may have gone away");
    }
}

/// Spawn the periodic per-room PLI ticker. Cancelled via `cancel`, which
/// should be wired to the owning session's (or room's) teardown path so
/// no detached task survives.
pub fn spawn_periodic(room: Arc<Room>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PERIODIC_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => sweep_room(&room).await,
            }
        }
    });
}

/// Schedule a one-shot delayed room-wide sweep, for edge-triggered events
/// (peer connection reaching `Connected`, ICE reaching `Connected`, or a
/// newly admitted late joiner).
pub fn schedule_edge_triggered(room: Arc<Room>) {
    tokio::spawn(async move {
        tokio::time::sleep(EDGE_TRIGGER_DELAY).await;
        sweep_room(&room).await;
    });
}

/// Issue a sweep immediately against a single client's own peer
/// connection, for the explicit `request-pli` signaling event (scoped to
/// the requester, not the whole room — see §4.4/§4.7).
pub async fn sweep_now(session: &ClientSession) {
    let Some(pc) = session.peer_conn.read().await.clone() else {
        return;
    };
    sweep_peer(&pc).await;
}
