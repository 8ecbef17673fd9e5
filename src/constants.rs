use crate::types::GridSize;

// Legacy solo/versus board.
pub const ROWS: i32 = 10;
pub const COLS: i32 = 4;
pub const LEGACY_GRID: GridSize = GridSize {
    rows: ROWS,
    cols: COLS,
};

/// Longest run of rows a legacy path may keep the same column.
pub const MAX_STRAIGHT_RUN: usize = 3;

pub const REVEAL_MS: u64 = 8_000;
pub const REVEAL_TICK_MS: u64 = 100;
pub const FLIP_BACK_STEP_MS: u64 = 70;
pub const FLIP_BACK_DUR_MS: u64 = 420;
pub const STUN_MS: u64 = 1_000;
pub const SHAKE_MS: u64 = 500;
pub const HEART_FLASH_MS: u64 = 900;
pub const SOLO_LIVES: u32 = 3;
pub const DECOY_ROLLBACK: usize = 3;
pub const TRAP_ROLLBACK: usize = 2;
pub const DECOY_MIN_LEVEL: u32 = 5;
pub const MAX_DECOYS: usize = 2;
pub const DEFAULT_GOLD_VALUE: u32 = 5;

// Flow mode.
pub const FLOW_GRID: GridSize = GridSize { rows: 6, cols: 6 };
pub const PATTERN_MIN_LENGTH: usize = 3;
pub const PATTERN_MAX_LENGTH: usize = 6;
pub const PATTERN_MAX_ATTEMPTS: usize = 100;
pub const ERROR_TOLERANCE: u32 = 2;

pub const COMBO_START: f64 = 1.0;
pub const COMBO_INCREMENT: f64 = 0.2;
pub const PERFECT_BONUS: u64 = 50;
pub const JACKPOT_STREAK: u32 = 3;
pub const JACKPOT_BONUS: u64 = 200;
pub const BASE_SCORE_PER_CELL: f64 = 10.0;

pub const BASE_BPM: u32 = 100;
pub const MAX_BPM: u32 = 180;
pub const BPM_INCREMENT: u32 = 5;
pub const PERFECT_TIME_MS: u64 = 3_000;

pub const OBSERVE_BASE_MS: u64 = 2_000;
pub const OBSERVE_PER_CELL_MS: u64 = 400;
pub const QUICK_PREVIEW_MS: u64 = 1_000;
pub const FLOW_CHAIN_PREVIEW_MS: u64 = 500;
pub const REWARD_DISPLAY_MS: u64 = 1_500;
pub const TRANSITION_MS: u64 = 500;

pub const DAILY_PATTERN_COUNT: usize = 5;

// Versus rooms.
pub const MAX_SCORE: u32 = 5;
pub const INITIAL_LIVES: u32 = 3;
pub const ROUND_DELAY_MS: u64 = 1_500;
pub const ROOM_CODE_LENGTH: usize = 6;
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const FREEZE_CLICKS: u32 = 3;
pub const PROGRESS_TICK_MS: u64 = 100;
pub const MIN_VERSUS_PLAYERS: usize = 2;
pub const MAX_ROOM_SEED: u64 = 1_000_000_000;
pub const VERSUS_PATH_SEED_STRIDE: u64 = 987_654_321;

pub const PLAYER_COLORS: [&str; 8] = [
    "#e74c3c", "#e67e22", "#f1c40f", "#2ecc71", "#1abc9c", "#3498db", "#9b59b6", "#fd79a8",
];

/// Time the board spends flipping cards back before reporting a win or loss.
pub fn flip_back_total_ms(rows: i32) -> u64 {
    rows.max(0) as u64 * FLIP_BACK_STEP_MS + FLIP_BACK_DUR_MS
}

pub fn observe_time_ms(pattern_len: usize) -> u64 {
    OBSERVE_BASE_MS + pattern_len as u64 * OBSERVE_PER_CELL_MS
}
