//! A room: the set of participants that exchange media and presence with
//! each other. A single `tokio::spawn`ed task drains an unbounded `mpsc`
//! channel and fans each enqueued message out to every other member.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::message::{Message, ServerEvent};
use crate::session::ClientSession;

/// The set of participants sharing media and presence.
pub struct Room {
    pub id: String,
    pub clients: RwLock<HashMap<String, Arc<ClientSession>>>,
    broadcast_tx: mpsc::UnboundedSender<Message>,
    pub quit: CancellationToken,
}

impl Room {
    /// Construct a room and spawn its broadcast loop. The returned
    /// `Arc<Room>` is the handle the registry keeps; dropping the
    /// `CancellationToken` guard (calling `quit.cancel()`) stops the loop.
    #[must_use]
    pub fn spawn(id: String) -> Arc<Self> {
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let room = Arc::new(Self {
            id,
            clients: RwLock::new(HashMap::new()),
            broadcast_tx,
            quit: CancellationToken::new(),
        });
        tokio::spawn(Self::run(Arc::clone(&room), broadcast_rx));
        room
    }

    /// The broadcast loop: fan every enqueued message out to every client
    /// except its declared `user_id`, until the room is cancelled or every
    /// sender handle is dropped. A single client's delivery failure is
    /// logged and never aborts the loop.
    async fn run(room: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Message>) {
        loop {
            tokio::select! {
                () = room.quit.cancelled() => break,
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    room.broadcast_except(&message.user_id, message).await;
                }
            }
        }
        info!(room_id = %room.id, "room broadcast loop stopped");
    }

    /// Enqueue a message onto the broadcast loop. Never blocks: the
    /// channel is unbounded, since the real back-pressure bound already
    /// exists one hop downstream, in each client's bounded outbound queue.
    pub fn broadcast(&self, event: ServerEvent) {
        let message = event.into_message(&self.id);
        if self.broadcast_tx.send(message).is_err() {
            warn!(room_id = %self.id, "room broadcast loop already stopped");
        }
    }

    /// Fan a message out to every client except `exclude_user_id`.
    /// Snapshots the client map under a read lock, releases it, then
    /// issues each `safe_send` outside the lock.
    async fn broadcast_except(&self, exclude_user_id: &str, message: Message) {
        let targets: Vec<Arc<ClientSession>> = {
            let clients = self.clients.read().await;
            clients
                .values()
                .filter(|c| c.user_id != exclude_user_id)
                .cloned()
                .collect()
        };
        for target in targets {
            target.safe_send(message.clone());
        }
    }

    /// Admit a client into the room. If a prior session under the same
    /// `user_id` is present, it is torn down first (closing its peer
    /// connection) so the new session is the sole owner of that identity.
    /// Broadcasts `user-join` after the new session is visible to other
    /// participants.
    pub async fn admit(&self, session: Arc<ClientSession>) {
        let previous = {
            let mut clients = self.clients.write().await;
            clients.insert(session.user_id.clone(), Arc::clone(&session))
        };
        if let Some(previous) = previous {
            previous.teardown().await;
        }
        let cam_state = *session.cam_on.read().await;
        let mic_state = *session.mic_on.read().await;
        self.broadcast(ServerEvent::UserJoin {
            user_id: session.user_id.clone(),
            cam_state,
            mic_state,
        });
    }

    /// Remove a client from the room and broadcast its departure. Does
    /// not tear down the session itself — the caller (transport teardown
    /// path) owns that.
    pub async fn evict(&self, user_id: &str) {
        let removed = self.clients.write().await.remove(user_id).is_some();
        if removed {
            self.broadcast(ServerEvent::UserLeave {
                user_id: user_id.to_string(),
            });
        }
    }

    /// Number of participants currently in the room.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether the room has no participants.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client(user_id: &str) -> Arc<ClientSession> {
        Arc::new(ClientSession::new(
            user_id.to_string(),
            "R".into(),
            "guest".into(),
            false,
            true,
        ))
    }

    async fn next_event(rx: &mut mpsc::Receiver<Message>) -> Message {
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("expected a message before the timeout")
            .expect("channel unexpectedly closed")
    }

    #[tokio::test]
    async fn admit_broadcasts_join_to_others_not_self() {
        let room = Room::spawn("R".into());

        let alice = client("A");
        let mut alice_rx = alice.take_send_rx().await.unwrap();
        room.admit(alice).await;

        let bob = client("B");
        let mut bob_rx = bob.take_send_rx().await.unwrap();
        room.admit(bob).await;

        let event = next_event(&mut alice_rx).await;
        assert_eq!(event.event, "user-join");
        assert_eq!(event.user_id, "B");

        // Bob must never receive his own join broadcast.
        assert!(
            tokio::time::timeout(Duration::from_millis(200), bob_rx.recv())
                .await
                .is_err()
        );

        room.quit.cancel();
    }

    #[tokio::test]
    async fn rejoin_with_same_user_id_evicts_previous_session() {
        let room = Room::spawn("R".into());

        let first = client("A");
        room.admit(Arc::clone(&first)).await;
        assert!(!first.is_done());

        let second = client("A");
        room.admit(Arc::clone(&second)).await;

        assert!(first.is_done(), "previous session must be torn down");
        assert_eq!(room.len().await, 1);

        room.quit.cancel();
    }

    #[tokio::test]
    async fn evict_broadcasts_leave_only_when_present() {
        let room = Room::spawn("R".into());

        let alice = client("A");
        let mut alice_rx = alice.take_send_rx().await.unwrap();
        room.admit(alice).await;

        let bob = client("B");
        let mut bob_rx = bob.take_send_rx().await.unwrap();
        room.admit(bob).await;
        let _ = next_event(&mut alice_rx).await; // Bob's user-join

        room.evict("A").await;
        let leave = next_event(&mut bob_rx).await;
        assert_eq!(leave.event, "user-leave");
        assert_eq!(leave.user_id, "A");

        // Evicting an id that's no longer present must not broadcast again.
        room.evict("A").await;
        assert!(
            tokio::time::timeout(Duration::from_millis(200), bob_rx.recv())
                .await
                .is_err()
        );

        room.quit.cancel();
    }
}
