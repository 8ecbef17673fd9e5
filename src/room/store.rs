use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, Mutex};

use crate::constants::FREEZE_CLICKS;
use crate::error::StoreError;

use super::{PlayerEntry, Room, RoomRow, RoomStatus};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Room-level transitions written to the `rooms` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomUpdate {
    Start { seed: u64, start_at_ms: u64 },
    Finish { winner_id: String, winner_time_ms: Option<u64> },
    Reset,
}

impl RoomUpdate {
    fn apply(&self, row: &mut RoomRow) {
        match self {
            RoomUpdate::Start { seed, start_at_ms } => {
                row.status = RoomStatus::Playing;
                row.seed = Some(*seed);
                row.start_at_ms = Some(*start_at_ms);
            }
            RoomUpdate::Finish {
                winner_id,
                winner_time_ms,
            } => {
                row.status = RoomStatus::Finished;
                row.winner_id = Some(winner_id.clone());
                row.winner_time_ms = *winner_time_ms;
            }
            RoomUpdate::Reset => {
                row.status = RoomStatus::Waiting;
                row.seed = None;
                row.start_at_ms = None;
                row.winner_id = None;
                row.winner_time_ms = None;
            }
        }
    }
}

/// Partial update of a player row; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerPatch {
    pub name: Option<String>,
    pub score: Option<u32>,
    pub lives: Option<u32>,
    pub progress: Option<f64>,
    pub current_round: Option<u32>,
    pub frozen_clicks: Option<u32>,
}

impl PlayerPatch {
    pub fn apply(&self, entry: &mut PlayerEntry) {
        if let Some(name) = &self.name {
            entry.name = name.clone();
        }
        if let Some(score) = self.score {
            entry.score = score;
        }
        if let Some(lives) = self.lives {
            entry.lives = lives;
        }
        if let Some(progress) = self.progress {
            entry.progress = progress;
        }
        if let Some(round) = self.current_round {
            entry.current_round = round;
        }
        if let Some(frozen) = self.frozen_clicks {
            entry.frozen_clicks = frozen;
        }
    }
}

/// Row-level change notification, filtered by subscribers on room code.
#[derive(Clone, Debug, PartialEq)]
pub enum RoomChange {
    Room(RoomRow),
    Player { room_code: String, player: PlayerEntry },
    PlayerRemoved { room_code: String, player_id: String },
}

impl RoomChange {
    pub fn room_code(&self) -> &str {
        match self {
            RoomChange::Room(row) => &row.code,
            RoomChange::Player { room_code, .. } | RoomChange::PlayerRemoved { room_code, .. } => {
                room_code
            }
        }
    }
}

/// The `rooms` and `players` tables plus the freeze procedure.
///
/// Every write is serialized by the backend; callers never lock.
pub trait RoomStore: Send + Sync + 'static {
    fn insert_room(&self, row: RoomRow) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn room(&self, code: &str) -> impl Future<Output = Result<RoomRow, StoreError>> + Send;

    fn update_room(
        &self,
        code: &str,
        update: RoomUpdate,
    ) -> impl Future<Output = Result<RoomRow, StoreError>> + Send;

    /// Players of a room in join order.
    fn players(&self, code: &str)
        -> impl Future<Output = Result<Vec<PlayerEntry>, StoreError>> + Send;

    fn insert_player(
        &self,
        code: &str,
        entry: PlayerEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// `Ok(None)` when the room exists but the player row does not.
    fn update_player(
        &self,
        code: &str,
        player_id: &str,
        patch: PlayerPatch,
    ) -> impl Future<Output = Result<Option<PlayerEntry>, StoreError>> + Send;

    fn update_all_players(
        &self,
        code: &str,
        patch: PlayerPatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_player(
        &self,
        code: &str,
        player_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Adds one point to the player's score under the store lock. `Ok(None)`
    /// when the player row does not exist.
    fn increment_score(
        &self,
        code: &str,
        player_id: &str,
    ) -> impl Future<Output = Result<Option<PlayerEntry>, StoreError>> + Send;

    /// Freezes every opponent of `player_id` in one atomic step.
    fn apply_freeze_power(
        &self,
        code: &str,
        player_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn changes(&self) -> broadcast::Receiver<RoomChange>;

    fn room_with_players(&self, code: &str) -> impl Future<Output = Result<Room, StoreError>> + Send {
        async move {
            let row = self.room(code).await?;
            let players = self.players(code).await?;
            Ok(Room { row, players })
        }
    }
}

#[derive(Default)]
struct Tables {
    rooms: HashMap<String, RoomRow>,
    players: HashMap<String, Vec<PlayerEntry>>,
}

impl Tables {
    fn room_players_mut(&mut self, code: &str) -> Result<&mut Vec<PlayerEntry>, StoreError> {
        if !self.rooms.contains_key(code) {
            return Err(StoreError::NotFound(code.to_string()));
        }
        Ok(self.players.entry(code.to_string()).or_default())
    }
}

/// In-process room store. One lock guards both tables.
pub struct MemoryRoomStore {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<RoomChange>,
    available: AtomicBool,
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tables: Mutex::new(Tables::default()),
            changes,
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: every call fails with `Unavailable` until restored.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn notify(&self, change: RoomChange) {
        // No receivers is fine.
        let _ = self.changes.send(change);
    }

    pub async fn room_count(&self) -> usize {
        self.tables.lock().await.rooms.len()
    }
}

impl RoomStore for MemoryRoomStore {
    async fn insert_room(&self, row: RoomRow) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        if tables.rooms.contains_key(&row.code) {
            return Err(StoreError::Conflict(row.code));
        }
        tables.rooms.insert(row.code.clone(), row.clone());
        tables.players.insert(row.code.clone(), Vec::new());
        drop(tables);
        self.notify(RoomChange::Room(row));
        Ok(())
    }

    async fn room(&self, code: &str) -> Result<RoomRow, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        tables
            .rooms
            .get(code)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(code.to_string()))
    }

    async fn update_room(&self, code: &str, update: RoomUpdate) -> Result<RoomRow, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let row = tables
            .rooms
            .get_mut(code)
            .ok_or_else(|| StoreError::NotFound(code.to_string()))?;
        update.apply(row);
        let row = row.clone();
        drop(tables);
        self.notify(RoomChange::Room(row.clone()));
        Ok(row)
    }

    async fn players(&self, code: &str) -> Result<Vec<PlayerEntry>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        if !tables.rooms.contains_key(code) {
            return Err(StoreError::NotFound(code.to_string()));
        }
        Ok(tables.players.get(code).cloned().unwrap_or_default())
    }

    async fn insert_player(&self, code: &str, entry: PlayerEntry) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let players = tables.room_players_mut(code)?;
        if players.iter().any(|player| player.id == entry.id) {
            return Err(StoreError::Conflict(entry.id));
        }
        players.push(entry.clone());
        drop(tables);
        self.notify(RoomChange::Player {
            room_code: code.to_string(),
            player: entry,
        });
        Ok(())
    }

    async fn update_player(
        &self,
        code: &str,
        player_id: &str,
        patch: PlayerPatch,
    ) -> Result<Option<PlayerEntry>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let players = tables.room_players_mut(code)?;
        let Some(player) = players.iter_mut().find(|player| player.id == player_id) else {
            return Ok(None);
        };
        patch.apply(player);
        let player = player.clone();
        drop(tables);
        self.notify(RoomChange::Player {
            room_code: code.to_string(),
            player: player.clone(),
        });
        Ok(Some(player))
    }

    async fn update_all_players(&self, code: &str, patch: PlayerPatch) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let players = tables.room_players_mut(code)?;
        for player in players.iter_mut() {
            patch.apply(player);
        }
        let updated = players.clone();
        drop(tables);
        for player in updated {
            self.notify(RoomChange::Player {
                room_code: code.to_string(),
                player,
            });
        }
        Ok(())
    }

    async fn delete_player(&self, code: &str, player_id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let players = tables.room_players_mut(code)?;
        let before = players.len();
        players.retain(|player| player.id != player_id);
        let removed = players.len() != before;
        drop(tables);
        if removed {
            self.notify(RoomChange::PlayerRemoved {
                room_code: code.to_string(),
                player_id: player_id.to_string(),
            });
        }
        Ok(removed)
    }

    async fn increment_score(
        &self,
        code: &str,
        player_id: &str,
    ) -> Result<Option<PlayerEntry>, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let players = tables.room_players_mut(code)?;
        let Some(player) = players.iter_mut().find(|player| player.id == player_id) else {
            return Ok(None);
        };
        player.score = player.score.saturating_add(1);
        let player = player.clone();
        drop(tables);
        self.notify(RoomChange::Player {
            room_code: code.to_string(),
            player: player.clone(),
        });
        Ok(Some(player))
    }

    async fn apply_freeze_power(&self, code: &str, player_id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let players = tables.room_players_mut(code)?;
        if !players.iter().any(|player| player.id == player_id) {
            return Err(StoreError::NotFound(player_id.to_string()));
        }
        let mut frozen = Vec::new();
        for player in players.iter_mut().filter(|player| player.id != player_id) {
            player.frozen_clicks = FREEZE_CLICKS;
            frozen.push(player.clone());
        }
        drop(tables);
        tracing::debug!(room = code, by = player_id, frozen = frozen.len(), "[room-store] freeze applied");
        for player in frozen {
            self.notify(RoomChange::Player {
                room_code: code.to_string(),
                player,
            });
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<RoomChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str) -> PlayerEntry {
        PlayerEntry::new(id, id, "#e74c3c")
    }

    #[tokio::test]
    async fn missing_room_is_not_found() {
        let store = MemoryRoomStore::new();
        assert_eq!(
            store.room("NOPE42").await,
            Err(StoreError::NotFound("NOPE42".to_string()))
        );
        assert!(store.insert_player("NOPE42", player("a")).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_rows_conflict() {
        let store = MemoryRoomStore::new();
        store.insert_room(RoomRow::waiting("ROOM22", "a")).await.expect("insert");
        assert!(matches!(
            store.insert_room(RoomRow::waiting("ROOM22", "b")).await,
            Err(StoreError::Conflict(_))
        ));
        store.insert_player("ROOM22", player("a")).await.expect("insert");
        assert!(matches!(
            store.insert_player("ROOM22", player("a")).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.room_count().await, 1);
    }

    #[tokio::test]
    async fn update_player_reports_missing_row() {
        let store = MemoryRoomStore::new();
        store.insert_room(RoomRow::waiting("ROOM22", "a")).await.expect("insert");
        let patch = PlayerPatch {
            score: Some(2),
            ..PlayerPatch::default()
        };
        assert_eq!(store.update_player("ROOM22", "ghost", patch.clone()).await, Ok(None));
        store.insert_player("ROOM22", player("a")).await.expect("insert");
        let updated = store
            .update_player("ROOM22", "a", patch)
            .await
            .expect("update")
            .expect("row");
        assert_eq!(updated.score, 2);
    }

    #[tokio::test]
    async fn concurrent_score_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryRoomStore::new());
        store.insert_room(RoomRow::waiting("ROOM22", "a")).await.expect("insert");
        store.insert_player("ROOM22", player("a")).await.expect("insert");
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { store.increment_score("ROOM22", "a").await })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("increment");
        }
        let players = store.players("ROOM22").await.expect("players");
        assert_eq!(players[0].score, 8);
        assert_eq!(store.increment_score("ROOM22", "ghost").await, Ok(None));
    }

    #[tokio::test]
    async fn freeze_hits_every_opponent_only() {
        let store = MemoryRoomStore::new();
        store.insert_room(RoomRow::waiting("ROOM22", "a")).await.expect("insert");
        for id in ["a", "b", "c"] {
            store.insert_player("ROOM22", player(id)).await.expect("insert");
        }
        let mut changes = store.changes();
        store.apply_freeze_power("ROOM22", "b").await.expect("freeze");
        let players = store.players("ROOM22").await.expect("players");
        let frozen: Vec<u32> = players.iter().map(|p| p.frozen_clicks).collect();
        assert_eq!(frozen, vec![FREEZE_CLICKS, 0, FREEZE_CLICKS]);

        let first = changes.recv().await.expect("change");
        assert_eq!(first.room_code(), "ROOM22");
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let store = MemoryRoomStore::new();
        store.set_available(false);
        assert_eq!(
            store.insert_room(RoomRow::waiting("ROOM22", "a")).await,
            Err(StoreError::Unavailable)
        );
        store.set_available(true);
        store.insert_room(RoomRow::waiting("ROOM22", "a")).await.expect("insert");
        let room = store.room_with_players("ROOM22").await.expect("room");
        assert!(room.players.is_empty());
    }
}
