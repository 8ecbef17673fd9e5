//! Versus rooms: shared seed, per-player rounds, lives and powers.

use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::constants::{INITIAL_LIVES, PLAYER_COLORS, ROOM_CODE_ALPHABET, ROOM_CODE_LENGTH};

pub mod cache;
pub mod progress;
pub mod store;
pub mod sync;
pub mod versus;

pub use self::cache::{CacheEvent, RoomCache};
pub use self::progress::{ProgressPublisher, ProgressTracker};
pub use self::store::{MemoryRoomStore, PlayerPatch, RoomChange, RoomStore, RoomUpdate};
pub use self::sync::{RoomSubscription, RoomSync};
pub use self::versus::VersusClient;

pub const DEFAULT_PLAYER_NAME: &str = "Player";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    #[default]
    Waiting,
    Playing,
    Finished,
}

/// One row of the `rooms` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRow {
    pub code: String,
    pub status: RoomStatus,
    pub host_id: String,
    pub seed: Option<u64>,
    pub start_at_ms: Option<u64>,
    pub winner_id: Option<String>,
    pub winner_time_ms: Option<u64>,
}

impl RoomRow {
    pub fn waiting(code: &str, host_id: &str) -> Self {
        Self {
            code: code.to_string(),
            status: RoomStatus::Waiting,
            host_id: host_id.to_string(),
            seed: None,
            start_at_ms: None,
            winner_id: None,
            winner_time_ms: None,
        }
    }
}

/// One row of the `players` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub id: String,
    pub name: String,
    pub color: String,
    pub score: u32,
    pub lives: u32,
    pub progress: f64,
    pub current_round: u32,
    pub frozen_clicks: u32,
}

impl PlayerEntry {
    pub fn new(id: &str, name: &str, color: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
            score: 0,
            lives: INITIAL_LIVES,
            progress: 0.0,
            current_round: 1,
            frozen_clicks: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.lives > 0
    }
}

/// A room with its players in join order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(flatten)]
    pub row: RoomRow,
    pub players: Vec<PlayerEntry>,
}

impl Room {
    pub fn code(&self) -> &str {
        &self.row.code
    }

    pub fn status(&self) -> RoomStatus {
        self.row.status
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerEntry> {
        self.players.iter().find(|player| player.id == player_id)
    }

    /// Inserts or replaces a player row, keeping join order.
    pub fn upsert_player(&mut self, entry: PlayerEntry) {
        match self.players.iter_mut().find(|player| player.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.players.push(entry),
        }
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|player| player.is_alive()).count()
    }

    /// Players by score, highest first. Ties keep join order.
    pub fn ranking(&self) -> Vec<&PlayerEntry> {
        let mut ranked: Vec<&PlayerEntry> = self.players.iter().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }
}

/// First palette color not already taken; a random palette color once all are used.
pub fn pick_available_color<'a>(used: impl IntoIterator<Item = &'a str>) -> &'static str {
    let used: Vec<String> = used.into_iter().map(str::to_ascii_lowercase).collect();
    PLAYER_COLORS
        .iter()
        .copied()
        .find(|color| !used.iter().any(|taken| taken == color))
        .unwrap_or_else(|| PLAYER_COLORS[rand::rng().random_range(0..PLAYER_COLORS.len())])
}

pub fn random_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Falls back to the default name for blank input and caps the length.
pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return DEFAULT_PLAYER_NAME.to_string();
    }
    trimmed.chars().take(16).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Power {
    Freeze,
}

impl Power {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "freeze" => Some(Power::Freeze),
            _ => None,
        }
    }
}
