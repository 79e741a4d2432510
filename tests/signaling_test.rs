//! Signaling engine integration tests.
//!
//! Exercises room membership, presence broadcast, and device-state
//! handling end to end without a live `RTCPeerConnection`.
//!
//! Run with: `cargo test --test signaling_test`

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use vc_sfu::message::{Message, ServerEvent};
use vc_sfu::registry::RoomRegistry;
use vc_sfu::room::Room;
use vc_sfu::session::ClientSession;
use vc_sfu::signaling::handlers;

fn session(user_id: &str, room_id: &str) -> Arc<ClientSession> {
    Arc::new(ClientSession::new(
        user_id.to_string(),
        room_id.to_string(),
        "guest".into(),
        false,
        true,
    ))
}

async fn next(rx: &mut mpsc::Receiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("expected a message before the timeout")
        .expect("channel closed unexpectedly")
}

async fn nothing_pending(rx: &mut mpsc::Receiver<Message>) {
    assert!(
        tokio::time::timeout(Duration::from_millis(150), rx.recv())
            .await
            .is_err(),
        "expected no message to be pending"
    );
}

/// Device toggle: Alice's state updates locally and Bob receives exactly
/// one `switch-camera-micro`; Alice never receives her own rebroadcast.
#[tokio::test]
async fn switch_camera_micro_updates_state_and_excludes_sender() {
    let room = Room::spawn("R".into());

    let alice = session("A", "R");
    let mut alice_rx = alice.take_send_rx().await.unwrap();
    room.admit(Arc::clone(&alice)).await;

    let bob = session("B", "R");
    let mut bob_rx = bob.take_send_rx().await.unwrap();
    room.admit(Arc::clone(&bob)).await;
    let _ = next(&mut alice_rx).await; // Bob's user-join

    handlers::handle_switch_camera_micro(&alice, &room, true, false)
        .await
        .unwrap();

    assert!(*alice.cam_on.read().await);
    assert!(!*alice.mic_on.read().await);

    let event = next(&mut bob_rx).await;
    assert_eq!(event.event, "switch-camera-micro");
    assert_eq!(event.user_id, "A");
    assert_eq!(
        event.payload,
        serde_json::json!({ "camState": true, "micState": false })
    );

    nothing_pending(&mut alice_rx).await;

    room.quit.cancel();
}

/// `start-share`/`stop-share` reach every other participant but never
/// the sender.
#[tokio::test]
async fn start_and_stop_share_rebroadcast_excluding_sender() {
    let room = Room::spawn("R".into());

    let alice = session("A", "R");
    let mut alice_rx = alice.take_send_rx().await.unwrap();
    room.admit(Arc::clone(&alice)).await;

    let bob = session("B", "R");
    let mut bob_rx = bob.take_send_rx().await.unwrap();
    room.admit(Arc::clone(&bob)).await;
    let _ = next(&mut alice_rx).await;

    handlers::handle_start_share(&alice, &room).await.unwrap();
    let start = next(&mut bob_rx).await;
    assert_eq!(start.event, "start-share");
    assert_eq!(start.user_id, "A");
    nothing_pending(&mut alice_rx).await;

    handlers::handle_stop_share(&alice, &room).await.unwrap();
    let stop = next(&mut bob_rx).await;
    assert_eq!(stop.event, "stop-share");
    nothing_pending(&mut alice_rx).await;

    room.quit.cancel();
}

/// Abrupt disconnect: evicting the session removes it from the room and
/// broadcasts `user-leave` to everyone else.
#[tokio::test]
async fn disconnect_removes_session_and_notifies_room() {
    let room = Room::spawn("R".into());

    let alice = session("A", "R");
    room.admit(Arc::clone(&alice)).await;

    let bob = session("B", "R");
    let mut bob_rx = bob.take_send_rx().await.unwrap();
    room.admit(Arc::clone(&bob)).await;

    alice.teardown().await;
    room.evict("A").await;

    let leave = next(&mut bob_rx).await;
    assert_eq!(leave.event, "user-leave");
    assert_eq!(leave.user_id, "A");
    assert_eq!(room.len().await, 1);

    room.quit.cancel();
}

/// Duplicate userId: a second admission for an already present userId
/// tears down the first session and ends up the sole occupant of that
/// identity.
#[tokio::test]
async fn duplicate_user_id_evicts_the_first_session() {
    let registry = RoomRegistry::new();
    let room = registry.get_or_create("R").await;

    let first = session("A", "R");
    room.admit(Arc::clone(&first)).await;
    assert!(!first.is_done());

    let second = session("A", "R");
    room.admit(Arc::clone(&second)).await;

    assert!(first.is_done());
    assert_eq!(room.len().await, 1);

    room.quit.cancel();
}

/// Joining an empty room produces no fan-out and no roster broadcast
/// target (nothing to assert against — there are no other participants
/// to receive anything).
#[tokio::test]
async fn first_participant_in_a_room_sees_no_peers() {
    let room = Room::spawn("R".into());
    let alice = session("A", "R");
    room.admit(Arc::clone(&alice)).await;

    assert_eq!(room.len().await, 1);
    room.quit.cancel();
}

/// Invariant: after a client tears down, its closed `done` state is
/// terminal and `safe_send` never delivers to it again even if the
/// caller still holds the `Arc`.
#[tokio::test]
async fn teardown_then_broadcast_never_reaches_the_torn_down_client() {
    let room = Room::spawn("R".into());

    let alice = session("A", "R");
    let mut alice_rx = alice.take_send_rx().await.unwrap();
    room.admit(Arc::clone(&alice)).await;
    alice.teardown().await;

    room.broadcast(ServerEvent::UserJoin {
        user_id: "someone-else".into(),
        cam_state: false,
        mic_state: false,
    });

    nothing_pending(&mut alice_rx).await;
    room.quit.cancel();
}
