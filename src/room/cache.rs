use super::{PlayerEntry, Room};

/// Inputs to the per-room cache.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheEvent {
    /// A single player row from a change notification, merged optimistically.
    LocalPatch(PlayerEntry),
    /// A removed player row.
    LocalRemove(String),
    /// A full authoritative fetch.
    ServerSnapshot(Room),
}

/// Last known state of one room.
///
/// `apply` returns the room to publish, or `None` when nothing visible changed.
#[derive(Clone, Debug, Default)]
pub struct RoomCache {
    room: Option<Room>,
}

impl RoomCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn apply(&mut self, event: CacheEvent) -> Option<Room> {
        match event {
            CacheEvent::LocalPatch(player) => {
                let room = self.room.as_mut()?;
                if room.player(&player.id) == Some(&player) {
                    return None;
                }
                room.upsert_player(player);
                Some(room.clone())
            }
            CacheEvent::LocalRemove(player_id) => {
                let room = self.room.as_mut()?;
                let before = room.players.len();
                room.players.retain(|player| player.id != player_id);
                (room.players.len() != before).then(|| room.clone())
            }
            CacheEvent::ServerSnapshot(snapshot) => {
                if self.room.as_ref() == Some(&snapshot) {
                    return None;
                }
                self.room = Some(snapshot.clone());
                Some(snapshot)
            }
        }
    }
}
