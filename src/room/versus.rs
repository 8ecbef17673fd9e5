use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::constants::{COLS, INITIAL_LIVES, LEGACY_GRID, PROGRESS_TICK_MS};
use crate::error::RoomError;
use crate::path::versus_path_for;
use crate::session::{
    BoardRole, BoardSetup, ClickOutcome, LegacyBoard, PatternSession, SessionOutcome,
};
use crate::types::{Cell, Path};

use super::progress::ProgressPublisher;
use super::store::RoomStore;
use super::sync::{RoomSubscription, RoomSync};
use super::{normalize_code, PlayerEntry, Room, RoomStatus};

/// One player's side of a versus match: room membership, the local board and
/// the background subscription and progress publisher.
pub struct VersusClient<S: RoomStore> {
    sync: RoomSync<S>,
    player_id: String,
    code: Option<String>,
    is_host: bool,
    room: Arc<watch::Sender<Option<Room>>>,
    progress: watch::Sender<f64>,
    subscription: Option<RoomSubscription>,
    publisher: Option<ProgressPublisher>,
    board: Option<LegacyBoard>,
    room_frozen_clicks: u32,
    outcome_reported: bool,
}

impl<S: RoomStore> VersusClient<S> {
    pub fn new(sync: RoomSync<S>, player_id: impl Into<String>) -> Self {
        let (room, _) = watch::channel(None);
        let (progress, _) = watch::channel(0.0);
        Self {
            sync,
            player_id: player_id.into(),
            code: None,
            is_host: false,
            room: Arc::new(room),
            progress,
            subscription: None,
            publisher: None,
            board: None,
            room_frozen_clicks: 0,
            outcome_reported: false,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// Latest known room state.
    pub fn room(&self) -> Option<Room> {
        self.room.borrow().clone()
    }

    pub fn updates(&self) -> watch::Receiver<Option<Room>> {
        self.room.subscribe()
    }

    pub fn board(&self) -> Option<&LegacyBoard> {
        self.board.as_ref()
    }

    fn set_room(&self, room: Room) {
        self.room.send_replace(Some(room));
    }

    fn me(&self) -> Option<PlayerEntry> {
        self.room
            .borrow()
            .as_ref()
            .and_then(|room| room.player(&self.player_id).cloned())
    }

    pub async fn create_room(&mut self, name: &str) -> Result<String, RoomError> {
        if name.trim().is_empty() {
            return Err(RoomError::Validation("name required"));
        }
        let code = self.sync.create_room(&self.player_id, name).await?;
        self.is_host = true;
        self.subscribe(&code).await;
        Ok(code)
    }

    pub async fn join_room(&mut self, code: &str, name: &str) -> Result<(), RoomError> {
        if name.trim().is_empty() {
            return Err(RoomError::Validation("name required"));
        }
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(RoomError::Validation("room code required"));
        }
        let room = self.sync.join_room(&code, &self.player_id, name).await?;
        self.is_host = room.row.host_id == self.player_id;
        self.subscribe(&code).await;
        Ok(())
    }

    /// Loads the room once, then follows its changes. A failed initial load
    /// still subscribes.
    async fn subscribe(&mut self, code: &str) {
        self.subscription = None;
        match self.sync.get_room(code).await {
            Ok(room) => self.set_room(room),
            Err(err) => tracing::warn!(room = code, error = %err, "[versus] initial load failed"),
        }
        let sender = Arc::clone(&self.room);
        self.subscription = Some(self.sync.subscribe_room(code, move |room| {
            sender.send_replace(Some(room));
        }));
        self.code = Some(code.to_string());
    }

    /// Pulls a fresh snapshot instead of waiting for the subscription.
    pub async fn refresh(&mut self) -> Result<Room, RoomError> {
        let code = self.code.clone().ok_or(RoomError::NoRoom)?;
        let room = self.sync.get_room(&code).await?;
        self.set_room(room.clone());
        Ok(room)
    }

    /// Host only. Picks the shared seed and a start time slightly in the future.
    pub async fn start_game(&mut self, now_ms: u64) -> Result<u64, RoomError> {
        if !self.is_host {
            return Err(RoomError::NotHost);
        }
        let code = self.code.clone().ok_or(RoomError::NoRoom)?;
        let seed = self.sync.start_match(&code, &self.player_id, now_ms).await?;
        self.refresh().await?;
        Ok(seed)
    }

    pub fn lives_used(&self) -> u32 {
        let lives = self.me().map(|me| me.lives).unwrap_or(INITIAL_LIVES);
        INITIAL_LIVES.saturating_sub(lives).min(INITIAL_LIVES)
    }

    pub fn wins(&self) -> u32 {
        self.me().map(|me| me.score).unwrap_or(0)
    }

    pub fn ranking(&self) -> Vec<PlayerEntry> {
        self.room()
            .map(|room| room.ranking().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Paths of the first `COLS` players, one start column each. Empty until
    /// the match has a seed.
    pub fn paths_by_player(&self) -> Vec<(String, Path)> {
        let Some(room) = self.room() else {
            return Vec::new();
        };
        let (Some(seed), Some(_)) = (room.row.seed, room.row.start_at_ms) else {
            return Vec::new();
        };
        room.players
            .iter()
            .take(COLS as usize)
            .enumerate()
            .map(|(idx, player)| {
                let path = versus_path_for(seed, idx, &player.id, LEGACY_GRID);
                (player.id.clone(), path)
            })
            .collect()
    }

    /// Opens the local board for the player's current round.
    pub fn begin_round(&mut self, now_ms: u64) -> Result<&LegacyBoard, RoomError> {
        let room = self.room().ok_or(RoomError::NoRoom)?;
        if room.status() != RoomStatus::Playing {
            return Err(RoomError::Validation("match not started"));
        }
        let (Some(seed), Some(start_at_ms)) = (room.row.seed, room.row.start_at_ms) else {
            return Err(RoomError::Validation("match not started"));
        };
        let index = room
            .players
            .iter()
            .position(|player| player.id == self.player_id)
            .ok_or(RoomError::Validation("not a member of this room"))?;
        let round = room.players[index].current_round.max(1);

        let round_seed = seed.wrapping_add(u64::from(round - 1));
        let mut setup = BoardSetup::new(versus_path_for(round_seed, index, &self.player_id, LEGACY_GRID));
        if round == 1 {
            setup.shared_start_at_ms = Some(start_at_ms);
        }
        let mut board = LegacyBoard::new(BoardRole::Versus, setup);
        board.start_reveal(now_ms);
        self.board = Some(board);
        self.outcome_reported = false;
        self.room_frozen_clicks = 0;
        self.update_freeze_state();
        self.progress.send_replace(0.0);
        self.start_progress_publisher();
        tracing::debug!(player = %self.player_id, round, "[versus] round started");
        self.board.as_ref().ok_or(RoomError::NoRoom)
    }

    fn start_progress_publisher(&mut self) {
        if self.publisher.as_ref().is_some_and(ProgressPublisher::is_running) {
            return;
        }
        let Some(code) = self.code.clone() else {
            return;
        };
        self.publisher = Some(ProgressPublisher::spawn(
            self.sync.clone(),
            code,
            self.player_id.clone(),
            self.progress.subscribe(),
            Duration::from_millis(PROGRESS_TICK_MS),
        ));
    }

    pub fn stop_progress_publisher(&mut self) {
        self.publisher = None;
    }

    fn publish_progress(&self) {
        if let Some(board) = self.board.as_ref().filter(|board| board.in_play()) {
            self.progress.send_replace(board.progress());
        }
    }

    /// Mirrors the room's freeze counter onto the board when it changed.
    /// Returns true when a fresh freeze landed.
    pub fn update_freeze_state(&mut self) -> bool {
        let Some(me) = self.me() else {
            return false;
        };
        if me.frozen_clicks == self.room_frozen_clicks {
            return false;
        }
        self.room_frozen_clicks = me.frozen_clicks;
        let Some(board) = self.board.as_mut() else {
            return false;
        };
        let was_frozen = board.is_frozen();
        board.apply_freeze(me.frozen_clicks);
        !was_frozen && board.is_frozen()
    }

    /// Highest-ranked other player still alive.
    fn opponent_id(&self) -> Option<String> {
        self.room().and_then(|room| {
            room.ranking()
                .into_iter()
                .find(|player| player.id != self.player_id && player.is_alive())
                .map(|player| player.id.clone())
        })
    }

    pub async fn click(&mut self, cell: Cell, now_ms: u64) -> ClickOutcome {
        let Some(board) = self.board.as_mut() else {
            return ClickOutcome::Ignored;
        };
        let was_frozen = board.is_frozen();
        let outcome = board.handle_click(cell, now_ms);
        let thawed = was_frozen && !board.is_frozen();
        self.publish_progress();

        if thawed {
            self.room_frozen_clicks = 0;
            let player_id = self.player_id.clone();
            self.room.send_modify(|room| {
                if let Some(me) = room
                    .as_mut()
                    .and_then(|room| room.players.iter_mut().find(|p| p.id == player_id))
                {
                    me.frozen_clicks = 0;
                }
            });
            if let Some(code) = self.code.clone() {
                if let Err(err) = self.sync.clear_frozen(&code, &self.player_id).await {
                    tracing::debug!(room = %code, error = %err, "[versus] thaw write failed");
                }
            }
        }

        if let ClickOutcome::LifeLost { .. } = outcome {
            let opponent = self.opponent_id();
            let room = self.report_life_loss_event(opponent.as_deref()).await;
            let busted = room
                .as_ref()
                .and_then(|room| room.player(&self.player_id))
                .is_some_and(|me| !me.is_alive());
            if busted {
                if let Some(board) = self.board.as_mut() {
                    board.force_failure(now_ms);
                }
            }
        }
        outcome
    }

    /// Advances the board; a finished win is reported to the room once.
    pub async fn tick(&mut self, now_ms: u64) -> Option<SessionOutcome> {
        let board = self.board.as_mut()?;
        board.tick(now_ms);
        let outcome = board.outcome();
        self.publish_progress();
        if let Some(SessionOutcome::Won { time_ms }) = outcome {
            if !self.outcome_reported {
                self.outcome_reported = true;
                self.report_round_victory(time_ms).await;
            }
        }
        outcome
    }

    pub async fn report_round_victory(&mut self, time_ms: u64) -> Option<Room> {
        let code = self.code.clone()?;
        match self.sync.report_round_win(&code, &self.player_id, time_ms).await {
            Ok(room) => {
                self.set_room(room.clone());
                Some(room)
            }
            Err(err) => {
                tracing::error!(room = %code, error = %err, "[versus] round win report failed");
                None
            }
        }
    }

    pub async fn report_life_loss_event(&mut self, opponent_id: Option<&str>) -> Option<Room> {
        let code = self.code.clone()?;
        match self.sync.report_life_loss(&code, &self.player_id, opponent_id).await {
            Ok(room) => {
                self.set_room(room.clone());
                Some(room)
            }
            Err(err) => {
                tracing::error!(room = %code, error = %err, "[versus] life loss report failed");
                None
            }
        }
    }

    pub async fn use_freeze_power(&mut self) -> bool {
        let Some(code) = self.code.clone() else {
            return false;
        };
        match self.sync.use_power(&code, &self.player_id, "freeze").await {
            Ok(room) => {
                self.set_room(room);
                true
            }
            Err(err) => {
                tracing::error!(room = %code, error = %err, "[versus] freeze failed");
                false
            }
        }
    }

    pub async fn reset_room(&mut self) -> Option<Room> {
        let code = self.code.clone()?;
        match self.sync.reset_room(&code).await {
            Ok(room) => {
                self.set_room(room.clone());
                self.board = None;
                self.stop_progress_publisher();
                Some(room)
            }
            Err(err) => {
                tracing::debug!(room = %code, error = %err, "[versus] reset failed");
                None
            }
        }
    }

    /// Deletes our player row and drops all local room state.
    pub async fn leave(&mut self) {
        if let Some(code) = self.code.clone() {
            if let Err(err) = self.sync.leave_room(&code, &self.player_id).await {
                tracing::error!(room = %code, error = %err, "[versus] leave failed");
            }
        }
        self.cleanup();
        self.code = None;
        self.is_host = false;
        self.room.send_replace(None);
    }

    /// Stops the subscription and the progress publisher.
    pub fn cleanup(&mut self) {
        self.subscription = None;
        self.stop_progress_publisher();
        if let Some(board) = self.board.as_mut() {
            board.teardown();
        }
    }
}
