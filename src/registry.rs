//! The process-wide table of live rooms, keyed by room id.
//!
//! An injectable `Arc<RoomRegistry>` handed to the signaling engine and
//! the WebSocket accept path, rather than a process-global table, so
//! tests can construct a fresh one per case.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::room::Room;

/// Looks up and lazily creates rooms, spawning each room's broadcast loop
/// exactly once at creation and tearing it down once the room empties.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the room for `room_id`, creating and spawning it if absent.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return Arc::clone(room);
        }
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            return Arc::clone(room);
        }
        let room = Room::spawn(room_id.to_string());
        rooms.insert(room_id.to_string(), Arc::clone(&room));
        info!(room_id, "room created");
        room
    }

    /// Return the room for `room_id` if it currently exists.
    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Remove and cancel `room_id`'s broadcast loop if it is empty. A
    /// concurrent `admit` racing this check may briefly find the room
    /// missing and recreate it via `get_or_create`, which is benign: a
    /// fresh room with no stale state is indistinguishable from the one
    /// just removed.
    pub async fn remove_if_empty(&self, room_id: &str) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id) else {
            return;
        };
        if room.is_empty().await {
            let room = rooms.remove(room_id).expect("checked present above");
            room.quit.cancel();
            info!(room_id, "room removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientSession;

    #[tokio::test]
    async fn get_or_create_returns_the_same_room_on_repeat_calls() {
        let registry = RoomRegistry::new();
        let first = registry.get_or_create("R").await;
        let second = registry.get_or_create("R").await;
        assert!(Arc::ptr_eq(&first, &second));
        first.quit.cancel();
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_room() {
        let registry = RoomRegistry::new();
        assert!(registry.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn remove_if_empty_leaves_occupied_rooms_alone() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("R").await;
        let alice = Arc::new(ClientSession::new(
            "A".into(),
            "R".into(),
            "guest".into(),
            false,
            true,
        ));
        room.admit(alice).await;

        registry.remove_if_empty("R").await;
        assert!(registry.get("R").await.is_some());

        room.evict("A").await;
        registry.remove_if_empty("R").await;
        assert!(registry.get("R").await.is_none());
    }
}
