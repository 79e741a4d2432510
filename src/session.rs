//! A single participant's signaling and media state.
//!
//! One [`ClientSession`] exists per connected WebSocket, holding the
//! `RTCPeerConnection` that terminates that participant's media, the
//! local tracks it publishes, and the bounded queues the transport pumps
//! drain. Teardown runs at most once, guarded by an async-safe
//! `tokio::sync::OnceCell` rather than a blocking `std::sync::Once`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::message::{Message, StreamDecl};

/// Queue depth for a client's inbound/outbound signaling channels.
pub const CHANNEL_CAPACITY: usize = 256;

/// State and handles for one connected participant.
pub struct ClientSession {
    pub user_id: String,
    pub room_id: String,

    /// Carried from the bootstrap payload; stored but never branched on.
    pub role: String,

    pub cam_on: RwLock<bool>,
    pub mic_on: RwLock<bool>,

    /// Populated once the join handshake creates the peer connection;
    /// never replaced afterward, only torn down.
    pub peer_conn: RwLock<Option<Arc<RTCPeerConnection>>>,

    pub audio_track: RwLock<Option<Arc<TrackLocalStaticRTP>>>,
    pub video_track: RwLock<Option<Arc<TrackLocalStaticRTP>>>,
    pub screen_track: RwLock<Option<Arc<TrackLocalStaticRTP>>>,

    /// The most recently declared `streams` array from this client's
    /// latest `offer`, used to resolve an incoming `TrackRemote` to its
    /// semantic kind.
    pub streams: RwLock<Vec<StreamDecl>>,

    /// Outbound signaling messages, drained by the transport's writer
    /// pump. Bounded so a stalled client cannot grow memory unboundedly.
    send_tx: mpsc::Sender<Message>,
    send_rx: RwLock<Option<mpsc::Receiver<Message>>>,

    /// Inbound signaling messages, drained by the signaling engine.
    read_tx: mpsc::Sender<Message>,
    read_rx: RwLock<Option<mpsc::Receiver<Message>>>,

    /// Signaled on teardown and whenever the peer connection's signaling
    /// state reaches `Stable`, so a pending renegotiation can stop
    /// polling it.
    pub stable: Notify,
    done_notify: Notify,
    done: AtomicBool,
    close_once: OnceCell<()>,

    /// Guards late admission so a peer connection that flaps through
    /// `Connected` more than once never double-attaches existing tracks
    /// or double-emits `get-all-user-states`.
    late_admitted: AtomicBool,

    /// Cancels this session's periodic PLI task on teardown; a child of
    /// no parent token since PLI scheduling is per-client, not per-room.
    pub cancel: CancellationToken,
}

impl ClientSession {
    #[must_use]
    pub fn new(user_id: String, room_id: String, role: String, cam_on: bool, mic_on: bool) -> Self {
        let (send_tx, send_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (read_tx, read_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            user_id,
            room_id,
            role,
            cam_on: RwLock::new(cam_on),
            mic_on: RwLock::new(mic_on),
            peer_conn: RwLock::new(None),
            audio_track: RwLock::new(None),
            video_track: RwLock::new(None),
            screen_track: RwLock::new(None),
            streams: RwLock::new(Vec::new()),
            send_tx,
            send_rx: RwLock::new(Some(send_rx)),
            read_tx,
            read_rx: RwLock::new(Some(read_rx)),
            stable: Notify::new(),
            done_notify: Notify::new(),
            done: AtomicBool::new(false),
            close_once: OnceCell::new(),
            late_admitted: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Mark late admission as performed, returning whether it had already
    /// run before this call (in which case the caller should skip it).
    pub fn mark_late_admitted(&self) -> bool {
        self.late_admitted.swap(true, Ordering::AcqRel)
    }

    /// Take the outbound receiver; the writer pump owns it for the
    /// session's lifetime. Returns `None` if already taken.
    pub async fn take_send_rx(&self) -> Option<mpsc::Receiver<Message>> {
        self.send_rx.write().await.take()
    }

    /// Take the inbound receiver; the signaling dispatch loop owns it.
    pub async fn take_read_rx(&self) -> Option<mpsc::Receiver<Message>> {
        self.read_rx.write().await.take()
    }

    /// Queue an inbound message from the transport's reader pump.
    pub async fn push_inbound(&self, message: Message) {
        if self.is_done() {
            return;
        }
        if self.read_tx.send(message).await.is_err() {
            debug!(user_id = %self.user_id, "dropped inbound message, dispatcher closed");
        }
    }

    /// Whether teardown has started for this session.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Wait until this session's peer connection reaches `done`.
    pub async fn wait_done(&self) {
        // Register interest before checking the flag: `Notify::notified()`
        // records a waiter at creation time, so a `notify_waiters()` call
        // racing between the flag check and the `.await` below is never
        // missed (the documented `tokio::sync::Notify` pattern).
        let notified = self.done_notify.notified();
        if self.is_done() {
            return;
        }
        notified.await;
    }

    /// Enqueue a message for delivery to this client without blocking.
    /// If the queue is full or already torn down, logs and drops —
    /// honoring "never blocks indefinitely" without an unbounded queue.
    pub fn safe_send(&self, message: Message) {
        if self.is_done() {
            return;
        }
        match self.send_tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id = %self.user_id, "outbound queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(user_id = %self.user_id, "dropped outbound message, writer closed");
            }
        }
    }

    /// Tear down this session's peer connection exactly once: remove
    /// every outbound sender before closing the connection. Safe to call
    /// from multiple concurrent paths (reader pump EOF, room eviction,
    /// connection-state callback).
    pub async fn teardown(&self) {
        self.done.store(true, Ordering::Release);
        self.done_notify.notify_waiters();
        self.cancel.cancel();
        self.close_once
            .get_or_init(|| async {
                let pc = self.peer_conn.write().await.take();
                if let Some(pc) = pc {
                    for sender in pc.get_senders().await {
                        if let Err(err) = pc.remove_track(&sender).await {
                            warn!(user_id = %self.user_id, %err, "error removing track on teardown");
                        }
                    }
                    if let Err(err) = pc.close().await {
                        warn!(user_id = %self.user_id, %err, "error closing peer connection");
                    }
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn test_message() -> Message {
        Message {
            event: "user-join".into(),
            user_id: "B".into(),
            room_id: "R".into(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn safe_send_delivers_until_done() {
        let session = ClientSession::new("A".into(), "R".into(), "host".into(), false, true);
        let mut send_rx = session.take_send_rx().await.unwrap();

        session.safe_send(test_message());
        assert!(send_rx.recv().await.is_some());

        session.teardown().await;
        session.safe_send(test_message());
        assert!(send_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn safe_send_drops_without_blocking_when_queue_is_full() {
        let session = ClientSession::new("A".into(), "R".into(), "host".into(), false, true);
        let _send_rx = session.take_send_rx().await.unwrap(); // keep sender side open, never drained

        for _ in 0..CHANNEL_CAPACITY {
            session.safe_send(test_message());
        }
        // One more past capacity must not panic or block; it is simply dropped.
        session.safe_send(test_message());
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let session = ClientSession::new("A".into(), "R".into(), "host".into(), false, true);
        session.teardown().await;
        session.teardown().await;
        assert!(session.is_done());
    }

    #[tokio::test]
    async fn wait_done_returns_after_teardown() {
        let session = Arc::new(ClientSession::new(
            "A".into(),
            "R".into(),
            "host".into(),
            false,
            true,
        ));
        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session.wait_done().await;
            })
        };
        session.teardown().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait_done should resolve once torn down")
            .unwrap();
    }
}
