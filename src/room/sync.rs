use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng as _;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::constants::{
    INITIAL_LIVES, MAX_ROOM_SEED, MAX_SCORE, MIN_VERSUS_PLAYERS, ROUND_DELAY_MS,
};
use crate::error::{RoomError, StoreError};

use super::cache::{CacheEvent, RoomCache};
use super::store::{PlayerPatch, RoomChange, RoomStore, RoomUpdate};
use super::{
    normalize_code, pick_available_color, random_code, sanitize_name, PlayerEntry, Power, Room,
    RoomRow, RoomStatus, DEFAULT_PLAYER_NAME,
};

const CODE_ATTEMPTS: usize = 8;

/// Room operations against a shared store, plus a per-room cache that backs
/// realtime subscriptions.
pub struct RoomSync<S> {
    store: Arc<S>,
    caches: Arc<Mutex<HashMap<String, RoomCache>>>,
}

impl<S> Clone for RoomSync<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            caches: Arc::clone(&self.caches),
        }
    }
}

/// Live subscription to one room. Dropping it stops the listener.
#[derive(Debug)]
pub struct RoomSubscription {
    code: String,
    handle: JoinHandle<()>,
}

impl RoomSubscription {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl<S: RoomStore> RoomSync<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            caches: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn cached_room(&self, code: &str) -> Option<Room> {
        let caches = self.caches.lock().await;
        caches.get(&normalize_code(code)).and_then(|cache| cache.room().cloned())
    }

    async fn apply_cache(&self, code: &str, event: CacheEvent) -> Option<Room> {
        let mut caches = self.caches.lock().await;
        caches.entry(code.to_string()).or_default().apply(event)
    }

    /// Authoritative fetch; refreshes the cache as a side effect.
    async fn fetch(&self, code: &str) -> Result<Room, RoomError> {
        let room = self.store.room_with_players(code).await?;
        self.apply_cache(code, CacheEvent::ServerSnapshot(room.clone()))
            .await;
        Ok(room)
    }

    pub async fn get_room(&self, code: &str) -> Result<Room, RoomError> {
        self.fetch(&normalize_code(code)).await
    }

    pub async fn create_room(&self, host_id: &str, name: &str) -> Result<String, RoomError> {
        if host_id.trim().is_empty() {
            return Err(RoomError::Validation("player id required"));
        }
        if name.trim().is_empty() {
            return Err(RoomError::Validation("name required"));
        }

        let mut attempts = 0;
        let code = loop {
            let code = random_code();
            match self.store.insert_room(RoomRow::waiting(&code, host_id)).await {
                Ok(()) => break code,
                Err(StoreError::Conflict(_)) if attempts + 1 < CODE_ATTEMPTS => {
                    attempts += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let host = PlayerEntry::new(
            host_id,
            &sanitize_name(name),
            pick_available_color(std::iter::empty()),
        );
        self.store.insert_player(&code, host).await?;
        tracing::info!(room = %code, host = host_id, "[room] created");
        Ok(code)
    }

    /// Adds the player with the next free color, or renames an existing row.
    pub async fn join_room(&self, code: &str, player_id: &str, name: &str) -> Result<Room, RoomError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(RoomError::Validation("room code required"));
        }
        if name.trim().is_empty() {
            return Err(RoomError::Validation("name required"));
        }
        if player_id.trim().is_empty() {
            return Err(RoomError::Validation("player id required"));
        }

        self.store.room(&code).await?;
        let name = sanitize_name(name);
        let rename = PlayerPatch {
            name: Some(name.clone()),
            ..PlayerPatch::default()
        };
        if self.store.update_player(&code, player_id, rename).await?.is_none() {
            let players = self.store.players(&code).await?;
            let color = pick_available_color(players.iter().map(|p| p.color.as_str()));
            self.store
                .insert_player(&code, PlayerEntry::new(player_id, &name, color))
                .await?;
            tracing::info!(room = %code, player = player_id, color, "[room] joined");
        }
        self.fetch(&code).await
    }

    /// Clears everyone's progress, then opens the match on `seed`.
    pub async fn start_room(&self, code: &str, seed: u64, start_at_ms: u64) -> Result<(), RoomError> {
        let code = normalize_code(code);
        let reset_progress = PlayerPatch {
            progress: Some(0.0),
            ..PlayerPatch::default()
        };
        self.store.update_all_players(&code, reset_progress).await?;
        self.store
            .update_room(&code, RoomUpdate::Start { seed, start_at_ms })
            .await?;
        tracing::info!(room = %code, seed, start_at_ms, "[room] started");
        Ok(())
    }

    /// Host-only start: draws a fresh seed and opens the first round
    /// `ROUND_DELAY_MS` after `now_ms`.
    pub async fn start_match(&self, code: &str, requester_id: &str, now_ms: u64) -> Result<u64, RoomError> {
        let code = normalize_code(code);
        let room = self.fetch(&code).await?;
        if room.row.host_id != requester_id {
            return Err(RoomError::NotHost);
        }
        let count = room.players.len();
        if count < MIN_VERSUS_PLAYERS {
            return Err(RoomError::NotEnoughPlayers {
                count,
                required: MIN_VERSUS_PLAYERS,
            });
        }
        let seed = rand::rng().random_range(0..MAX_ROOM_SEED);
        self.start_room(&code, seed, now_ms + ROUND_DELAY_MS).await?;
        Ok(seed)
    }

    pub async fn finish_room(&self, code: &str, winner_id: &str, time_ms: u64) -> Result<(), RoomError> {
        let code = normalize_code(code);
        self.store
            .update_room(
                &code,
                RoomUpdate::Finish {
                    winner_id: winner_id.to_string(),
                    winner_time_ms: Some(time_ms),
                },
            )
            .await?;
        tracing::info!(room = %code, winner = winner_id, time_ms, "[room] finished");
        Ok(())
    }

    /// Scores a round for `winner_id`. The match ends once every player has
    /// reached the max score or at most one player is still alive; otherwise
    /// only the winner moves on to their next round. A finished room is
    /// returned untouched so the recorded winner never changes.
    pub async fn report_round_win(
        &self,
        code: &str,
        winner_id: &str,
        time_ms: u64,
    ) -> Result<Room, RoomError> {
        let code = normalize_code(code);
        let room = self.fetch(&code).await?;
        if room.status() == RoomStatus::Finished {
            tracing::debug!(room = %code, player = winner_id, "[room] late round win ignored");
            return Ok(room);
        }
        let Some(winner) = self.store.increment_score(&code, winner_id).await? else {
            return Ok(room);
        };

        let players = self.store.players(&code).await?;
        let all_finished = players.iter().all(|player| player.score >= MAX_SCORE);
        let alive: Vec<&PlayerEntry> = players.iter().filter(|player| player.is_alive()).collect();
        if all_finished || alive.len() <= 1 {
            let final_winner = match alive.as_slice() {
                [survivor] if !all_finished => survivor.id.clone(),
                _ => highest_score(&players).unwrap_or(winner_id).to_string(),
            };
            self.finish_room(&code, &final_winner, time_ms).await?;
            return self.fetch(&code).await;
        }

        let next_round = PlayerPatch {
            current_round: Some(winner.current_round + 1),
            progress: Some(0.0),
            ..PlayerPatch::default()
        };
        self.store.update_player(&code, winner_id, next_round).await?;
        tracing::debug!(room = %code, player = winner_id, round = winner.current_round + 1, "[room] round won");
        self.fetch(&code).await
    }

    /// Takes one life from `loser_id` without touching the round. A busted
    /// player ends the match when a winner is given. Nothing changes once the
    /// room is finished.
    pub async fn report_life_loss(
        &self,
        code: &str,
        loser_id: &str,
        winner_if_busted: Option<&str>,
    ) -> Result<Room, RoomError> {
        let code = normalize_code(code);
        let room = self.fetch(&code).await?;
        if room.status() == RoomStatus::Finished {
            tracing::debug!(room = %code, player = loser_id, "[room] late life loss ignored");
            return Ok(room);
        }
        let players = room.players;
        let existing = players.iter().find(|player| player.id == loser_id);
        let lives = existing
            .map(|player| player.lives)
            .unwrap_or(INITIAL_LIVES)
            .saturating_sub(1);

        if existing.is_some() {
            let patch = PlayerPatch {
                lives: Some(lives),
                ..PlayerPatch::default()
            };
            self.store.update_player(&code, loser_id, patch).await?;
        } else {
            let color = pick_available_color(players.iter().map(|p| p.color.as_str()));
            let mut entry = PlayerEntry::new(loser_id, DEFAULT_PLAYER_NAME, color);
            entry.lives = lives;
            self.store.insert_player(&code, entry).await?;
        }
        tracing::debug!(room = %code, player = loser_id, lives, "[room] life lost");

        if lives == 0 {
            if let Some(winner_id) = winner_if_busted {
                self.store
                    .update_room(
                        &code,
                        RoomUpdate::Finish {
                            winner_id: winner_id.to_string(),
                            winner_time_ms: None,
                        },
                    )
                    .await?;
                tracing::info!(room = %code, busted = loser_id, winner = winner_id, "[room] finished");
            }
        }
        self.fetch(&code).await
    }

    /// Upserts the player's progress, clamped to `[0, 1]`.
    pub async fn set_player_progress(
        &self,
        code: &str,
        player_id: &str,
        progress: f64,
    ) -> Result<(), RoomError> {
        let code = normalize_code(code);
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let patch = PlayerPatch {
            progress: Some(progress),
            ..PlayerPatch::default()
        };
        if self.store.update_player(&code, player_id, patch).await?.is_none() {
            let players = self.store.players(&code).await?;
            let color = pick_available_color(players.iter().map(|p| p.color.as_str()));
            let mut entry = PlayerEntry::new(player_id, DEFAULT_PLAYER_NAME, color);
            entry.progress = progress;
            self.store.insert_player(&code, entry).await?;
        }
        Ok(())
    }

    pub async fn use_power(&self, code: &str, player_id: &str, power: &str) -> Result<Room, RoomError> {
        let Some(power) = Power::parse(power) else {
            return Err(RoomError::UnknownPower(power.to_string()));
        };
        let code = normalize_code(code);
        match power {
            Power::Freeze => self.store.apply_freeze_power(&code, player_id).await?,
        }
        tracing::debug!(room = %code, player = player_id, power = ?power, "[room] power used");
        self.fetch(&code).await
    }

    /// Writes a local thaw back so the next freeze registers as a change.
    pub async fn clear_frozen(&self, code: &str, player_id: &str) -> Result<(), RoomError> {
        let patch = PlayerPatch {
            frozen_clicks: Some(0),
            ..PlayerPatch::default()
        };
        self.store
            .update_player(&normalize_code(code), player_id, patch)
            .await?;
        Ok(())
    }

    /// Back to the lobby: fresh lives, scores, progress and rounds.
    pub async fn reset_room(&self, code: &str) -> Result<Room, RoomError> {
        let code = normalize_code(code);
        let fresh = PlayerPatch {
            score: Some(0),
            lives: Some(INITIAL_LIVES),
            progress: Some(0.0),
            current_round: Some(1),
            frozen_clicks: Some(0),
            ..PlayerPatch::default()
        };
        self.store.update_all_players(&code, fresh).await?;
        self.store.update_room(&code, RoomUpdate::Reset).await?;
        tracing::info!(room = %code, "[room] reset");
        self.fetch(&code).await
    }

    pub async fn leave_room(&self, code: &str, player_id: &str) -> Result<(), RoomError> {
        let code = normalize_code(code);
        if self.store.delete_player(&code, player_id).await? {
            tracing::info!(room = %code, player = player_id, "[room] left");
        }
        Ok(())
    }

    /// Streams room updates to `callback` until the subscription is dropped.
    ///
    /// Player-row changes are merged into the cached room and published at once,
    /// then replaced by a fresh fetch if the server disagrees. Room-row changes
    /// always refetch, falling back to the cached room when the fetch fails.
    pub fn subscribe_room<F>(&self, code: &str, callback: F) -> RoomSubscription
    where
        F: Fn(Room) + Send + Sync + 'static,
    {
        let code = normalize_code(code);
        let mut changes = self.store.changes();
        let sync = self.clone();
        let room_code = code.clone();
        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.room_code() == room_code => {
                        sync.on_change(&room_code, change, &callback).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(room = %room_code, skipped, "[room] subscriber lagged");
                        sync.on_room_change(&room_code, &callback).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        RoomSubscription { code, handle }
    }

    async fn on_change<F>(&self, code: &str, change: RoomChange, callback: &F)
    where
        F: Fn(Room) + Send + Sync + 'static,
    {
        let optimistic = match change {
            RoomChange::Room(_) => return self.on_room_change(code, callback).await,
            RoomChange::Player { player, .. } => CacheEvent::LocalPatch(player),
            RoomChange::PlayerRemoved { player_id, .. } => CacheEvent::LocalRemove(player_id),
        };
        if let Some(room) = self.apply_cache(code, optimistic).await {
            callback(room);
        }
        match self.store.room_with_players(code).await {
            Ok(fresh) => {
                if let Some(room) = self.apply_cache(code, CacheEvent::ServerSnapshot(fresh)).await {
                    callback(room);
                }
            }
            Err(err) => tracing::debug!(room = code, error = %err, "[room] refetch failed"),
        }
    }

    async fn on_room_change<F>(&self, code: &str, callback: &F)
    where
        F: Fn(Room) + Send + Sync + 'static,
    {
        match self.fetch(code).await {
            Ok(room) => callback(room),
            Err(err) => {
                tracing::warn!(room = code, error = %err, "[room] fetch failed, using cache");
                if let Some(room) = self.cached_room(code).await {
                    callback(room);
                }
            }
        }
    }
}

/// Highest score wins; ties go to the earliest joiner.
fn highest_score(players: &[PlayerEntry]) -> Option<&str> {
    players
        .iter()
        .fold(None::<&PlayerEntry>, |best, player| match best {
            Some(current) if current.score >= player.score => Some(current),
            _ => Some(player),
        })
        .map(|player| player.id.as_str())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::constants::{FREEZE_CLICKS, PLAYER_COLORS};
    use crate::room::store::MemoryRoomStore;
    use tokio::sync::mpsc;

    async fn two_player_room() -> (RoomSync<MemoryRoomStore>, String) {
        let sync = RoomSync::new(Arc::new(MemoryRoomStore::new()));
        let code = sync.create_room("A", "Alice").await.expect("create");
        sync.join_room(&code, "B", "Bob").await.expect("join");
        sync.start_room(&code, 42, 1_000).await.expect("start");
        (sync, code)
    }

    #[tokio::test]
    async fn create_and_join_assign_distinct_colors() {
        let (sync, code) = two_player_room().await;
        let room = sync.get_room(&code).await.expect("room");
        assert_eq!(room.row.host_id, "A");
        assert_eq!(room.status(), RoomStatus::Playing);
        assert_eq!(room.row.seed, Some(42));
        let colors: Vec<&str> = room.players.iter().map(|p| p.color.as_str()).collect();
        assert_eq!(colors, vec![PLAYER_COLORS[0], PLAYER_COLORS[1]]);

        // Joining again only renames.
        let room = sync.join_room(&code.to_lowercase(), "B", "Bobby").await.expect("rejoin");
        assert_eq!(room.players.len(), 2);
        assert_eq!(room.player("B").map(|p| p.name.as_str()), Some("Bobby"));
    }

    #[tokio::test]
    async fn validation_happens_before_any_write() {
        let store = Arc::new(MemoryRoomStore::new());
        let sync = RoomSync::new(Arc::clone(&store));
        assert_eq!(
            sync.create_room("A", "  ").await,
            Err(RoomError::Validation("name required"))
        );
        assert_eq!(store.room_count().await, 0);
        assert_eq!(
            sync.join_room("", "B", "Bob").await,
            Err(RoomError::Validation("room code required"))
        );
        assert_eq!(
            sync.join_room("ZZZZZZ", "B", "Bob").await,
            Err(RoomError::NotFound("ZZZZZZ".to_string()))
        );
    }

    #[tokio::test]
    async fn only_the_host_starts_a_full_room() {
        let sync = RoomSync::new(Arc::new(MemoryRoomStore::new()));
        let code = sync.create_room("A", "Alice").await.expect("create");
        assert_eq!(
            sync.start_match(&code, "A", 0).await,
            Err(RoomError::NotEnoughPlayers { count: 1, required: MIN_VERSUS_PLAYERS })
        );
        sync.join_room(&code, "B", "Bob").await.expect("join");
        assert_eq!(sync.start_match(&code, "B", 0).await, Err(RoomError::NotHost));

        let seed = sync.start_match(&code.to_lowercase(), "A", 5_000).await.expect("start");
        let room = sync.get_room(&code).await.expect("room");
        assert_eq!(room.status(), RoomStatus::Playing);
        assert_eq!(room.row.seed, Some(seed));
        assert_eq!(room.row.start_at_ms, Some(5_000 + ROUND_DELAY_MS));
    }

    #[tokio::test]
    async fn round_wins_finish_only_when_everyone_reaches_max_score() {
        let (sync, code) = two_player_room().await;
        for _ in 0..4 {
            sync.report_round_win(&code, "A", 1_200).await.expect("win");
        }
        let room = sync.get_room(&code).await.expect("room");
        let a = room.player("A").expect("A");
        assert_eq!(a.score, 4);
        assert_eq!(a.current_round, 5);
        assert_eq!(room.player("B").map(|b| b.current_round), Some(1));
        assert_eq!(room.status(), RoomStatus::Playing);

        for _ in 0..5 {
            sync.report_round_win(&code, "B", 1_500).await.expect("win");
        }
        let room = sync.report_round_win(&code, "A", 1_200).await.expect("win");
        assert_eq!(room.status(), RoomStatus::Finished);
        assert_eq!(room.row.winner_id.as_deref(), Some("A"));
        assert_eq!(room.row.winner_time_ms, Some(1_200));
    }

    #[tokio::test]
    async fn late_reports_leave_a_finished_room_alone() {
        let (sync, code) = two_player_room().await;
        for _ in 0..5 {
            sync.report_round_win(&code, "A", 1_200).await.expect("win");
        }
        for _ in 0..5 {
            sync.report_round_win(&code, "B", 1_500).await.expect("win");
        }
        let room = sync.get_room(&code).await.expect("room");
        assert_eq!(room.status(), RoomStatus::Finished);
        assert_eq!(room.row.winner_id.as_deref(), Some("A"));

        let room = sync.report_round_win(&code, "B", 999).await.expect("late win");
        assert_eq!(room.row.winner_id.as_deref(), Some("A"));
        assert_eq!(room.row.winner_time_ms, Some(1_500));
        assert_eq!(room.player("B").map(|b| b.score), Some(MAX_SCORE));

        let room = sync.report_life_loss(&code, "A", Some("B")).await.expect("late loss");
        assert_eq!(room.player("A").map(|a| a.lives), Some(INITIAL_LIVES));
        assert_eq!(room.row.winner_id.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn lowercase_codes_reach_every_operation() {
        let (sync, code) = two_player_room().await;
        let lower = code.to_lowercase();
        sync.set_player_progress(&lower, "A", 0.4).await.expect("progress");
        let room = sync.report_round_win(&lower, "B", 700).await.expect("win");
        assert_eq!(room.player("B").map(|b| b.score), Some(1));
        let room = sync.report_life_loss(&lower, "A", None).await.expect("loss");
        assert_eq!(room.player("A").map(|a| (a.lives, a.progress)), Some((INITIAL_LIVES - 1, 0.4)));
        let room = sync.use_power(&lower, "A", "freeze").await.expect("freeze");
        assert_eq!(room.player("B").map(|b| b.frozen_clicks), Some(FREEZE_CLICKS));
        sync.clear_frozen(&lower, "B").await.expect("thaw");
        assert!(sync.cached_room(&lower).await.is_some());
        sync.leave_room(&lower, "B").await.expect("leave");
        let room = sync.reset_room(&lower).await.expect("reset");
        assert_eq!(room.status(), RoomStatus::Waiting);
        assert_eq!(room.players.len(), 1);
        sync.start_room(&lower, 7, 0).await.expect("start");
        sync.finish_room(&lower, "A", 10).await.expect("finish");
        assert_eq!(sync.get_room(&code).await.expect("room").status(), RoomStatus::Finished);
    }

    #[tokio::test]
    async fn winning_a_round_resets_only_the_winner_progress() {
        let (sync, code) = two_player_room().await;
        sync.set_player_progress(&code, "A", 0.8).await.expect("progress");
        sync.set_player_progress(&code, "B", 0.6).await.expect("progress");
        let room = sync.report_round_win(&code, "A", 900).await.expect("win");
        assert_eq!(room.player("A").map(|p| p.progress), Some(0.0));
        assert_eq!(room.player("B").map(|p| p.progress), Some(0.6));
    }

    #[tokio::test]
    async fn third_life_loss_busts_and_finishes() {
        let (sync, code) = two_player_room().await;
        for expected in [2, 1] {
            let room = sync.report_life_loss(&code, "B", Some("A")).await.expect("loss");
            assert_eq!(room.player("B").map(|p| p.lives), Some(expected));
            assert_eq!(room.status(), RoomStatus::Playing);
        }
        let room = sync.report_life_loss(&code, "B", Some("A")).await.expect("loss");
        assert_eq!(room.player("B").map(|p| p.lives), Some(0));
        assert_eq!(room.status(), RoomStatus::Finished);
        assert_eq!(room.row.winner_id.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn sole_survivor_wins_when_others_are_out() {
        let (sync, code) = two_player_room().await;
        sync.report_round_win(&code, "A", 100).await.expect("win");
        for _ in 0..3 {
            sync.report_life_loss(&code, "A", None).await.expect("loss");
        }
        assert_eq!(sync.get_room(&code).await.expect("room").status(), RoomStatus::Playing);
        let room = sync.report_round_win(&code, "B", 800).await.expect("win");
        assert_eq!(room.status(), RoomStatus::Finished);
        assert_eq!(room.row.winner_id.as_deref(), Some("B"));
        assert_eq!(room.row.winner_time_ms, Some(800));
    }

    #[tokio::test]
    async fn progress_is_clamped_and_upserted() {
        let (sync, code) = two_player_room().await;
        sync.set_player_progress(&code, "A", 7.0).await.expect("progress");
        sync.set_player_progress(&code, "ghost", f64::NAN).await.expect("progress");
        let room = sync.get_room(&code).await.expect("room");
        assert_eq!(room.player("A").map(|p| p.progress), Some(1.0));
        let ghost = room.player("ghost").expect("inserted");
        assert_eq!(ghost.name, DEFAULT_PLAYER_NAME);
        assert_eq!(ghost.progress, 0.0);
        assert_eq!(ghost.color, PLAYER_COLORS[2]);
    }

    #[tokio::test]
    async fn freeze_and_reset() {
        let (sync, code) = two_player_room().await;
        assert_eq!(
            sync.use_power(&code, "A", "bomb").await,
            Err(RoomError::UnknownPower("bomb".to_string()))
        );
        let room = sync.use_power(&code, "A", "freeze").await.expect("freeze");
        assert_eq!(room.player("B").map(|p| p.frozen_clicks), Some(FREEZE_CLICKS));
        assert_eq!(room.player("A").map(|p| p.frozen_clicks), Some(0));

        sync.report_round_win(&code, "A", 10).await.expect("win");
        let room = sync.reset_room(&code).await.expect("reset");
        assert_eq!(room.status(), RoomStatus::Waiting);
        assert_eq!(room.row.seed, None);
        assert!(room
            .players
            .iter()
            .all(|p| p.score == 0 && p.lives == INITIAL_LIVES && p.current_round == 1 && p.frozen_clicks == 0));
    }

    #[tokio::test]
    async fn subscription_publishes_merge_and_stops_on_drop() {
        let (sync, code) = two_player_room().await;
        sync.get_room(&code).await.expect("prime cache");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = sync.subscribe_room(&code, move |room| {
            let _ = tx.send(room);
        });
        assert!(subscription.is_active());

        sync.set_player_progress(&code, "B", 0.5).await.expect("progress");
        let room = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("callback in time")
            .expect("room");
        assert_eq!(room.player("B").map(|p| p.progress), Some(0.5));

        subscription.unsubscribe();
        sync.set_player_progress(&code, "B", 0.9).await.expect("progress");
        loop {
            match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(room)) => {
                    // Anything still queued predates the unsubscribe.
                    assert_ne!(room.player("B").map(|p| p.progress), Some(0.9));
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    #[tokio::test]
    async fn room_change_falls_back_to_cache_on_fetch_error() {
        let (sync, code) = two_player_room().await;
        sync.get_room(&code).await.expect("prime cache");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = sync.subscribe_room(&code, move |room| {
            let _ = tx.send(room);
        });
        sync.finish_room(&code, "A", 3_000).await.expect("finish");
        let room = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("callback in time")
            .expect("room");
        assert_eq!(room.status(), RoomStatus::Finished);

        sync.store().set_available(false);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        sync.on_room_change(&code, &move |room: Room| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(room.status());
            }
        })
        .await;
        let seen = seen.lock().expect("lock").clone();
        assert_eq!(seen, vec![RoomStatus::Finished]);
    }
}
