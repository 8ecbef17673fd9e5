use serde::{Deserialize, Serialize};

use crate::constants::{
    BASE_BPM, BASE_SCORE_PER_CELL, BPM_INCREMENT, COMBO_START, JACKPOT_BONUS, MAX_BPM,
    PERFECT_BONUS, PERFECT_TIME_MS,
};

/// Observation speed for the next Flow pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Branch {
    #[default]
    FullPreview,
    QuickPreview,
    FlowChain,
}

// Float noise from repeated 0.2 increments must not cost a point.
const SCORE_EPSILON: f64 = 1e-9;

pub fn pattern_score(pattern_len: usize, combo: f64, perfect: bool) -> u64 {
    let base = pattern_len as f64 * BASE_SCORE_PER_CELL;
    let combo_score = (base * combo + SCORE_EPSILON).floor().max(0.0) as u64;
    combo_score + if perfect { PERFECT_BONUS } else { 0 }
}

pub fn decide_next_branch(perfect: bool, time_ms: u64) -> Branch {
    if !perfect {
        Branch::FullPreview
    } else if time_ms <= PERFECT_TIME_MS {
        Branch::FlowChain
    } else {
        Branch::QuickPreview
    }
}

pub fn next_tempo(current_bpm: u32, perfect: bool) -> u32 {
    if perfect {
        (current_bpm + BPM_INCREMENT).min(MAX_BPM)
    } else {
        BASE_BPM
    }
}

/// Result of one completed pattern.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRecord {
    pub length: usize,
    pub perfect: bool,
    pub errors: u32,
    pub time_ms: u64,
    pub score: u64,
    pub combo: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreStats {
    pub total_score: u64,
    pub current_combo: f64,
    pub max_combo: f64,
    pub current_streak: u32,
    pub max_streak: u32,
    pub total_patterns: u32,
    pub perfect_patterns: u32,
    pub jackpot_count: u32,
    pub total_errors: u32,
    pub accuracy: u32,
    pub average_time_ms: u64,
    pub perfect_count: u32,
}

/// Running score ledger for a Flow session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreManager {
    total_score: u64,
    current_combo: f64,
    max_combo: f64,
    current_streak: u32,
    max_streak: u32,
    perfect_count: u32,
    total_patterns: u32,
    perfect_patterns: u32,
    jackpot_count: u32,
    total_errors: u32,
    history: Vec<PatternRecord>,
}

impl Default for ScoreManager {
    fn default() -> Self {
        Self {
            total_score: 0,
            current_combo: COMBO_START,
            max_combo: COMBO_START,
            current_streak: 0,
            max_streak: 0,
            perfect_count: 0,
            total_patterns: 0,
            perfect_patterns: 0,
            jackpot_count: 0,
            total_errors: 0,
            history: Vec::new(),
        }
    }
}

impl ScoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_score(&self) -> u64 {
        self.total_score
    }

    pub fn add_score(&mut self, points: u64) -> u64 {
        self.total_score += points;
        self.total_score
    }

    pub fn update_combo(&mut self, combo: f64) {
        self.current_combo = combo;
        if combo > self.max_combo {
            self.max_combo = combo;
        }
    }

    pub fn reset_combo(&mut self) {
        self.current_combo = COMBO_START;
    }

    pub fn record_pattern(&mut self, record: PatternRecord) {
        self.total_patterns += 1;
        if record.perfect {
            self.perfect_patterns += 1;
            self.perfect_count += 1;
            self.current_streak += 1;
            self.max_streak = self.max_streak.max(self.current_streak);
        } else {
            self.current_streak = 0;
            self.perfect_count = 0;
        }
        self.total_errors += record.errors;
        self.history.push(record);
    }

    pub fn record_jackpot(&mut self) -> u32 {
        self.jackpot_count += 1;
        self.add_score(JACKPOT_BONUS);
        self.perfect_count = 0;
        self.jackpot_count
    }

    /// Percent of perfect patterns; 100 before anything is played.
    pub fn accuracy(&self) -> u32 {
        if self.total_patterns == 0 {
            return 100;
        }
        (self.perfect_patterns as f64 / self.total_patterns as f64 * 100.0).round() as u32
    }

    pub fn average_time_ms(&self) -> u64 {
        if self.history.is_empty() {
            return 0;
        }
        let total: u64 = self.history.iter().map(|r| r.time_ms).sum();
        (total as f64 / self.history.len() as f64).round() as u64
    }

    pub fn history(&self) -> &[PatternRecord] {
        &self.history
    }

    pub fn recent_history(&self, count: usize) -> &[PatternRecord] {
        let start = self.history.len().saturating_sub(count);
        &self.history[start..]
    }

    pub fn stats(&self) -> ScoreStats {
        ScoreStats {
            total_score: self.total_score,
            current_combo: self.current_combo,
            max_combo: self.max_combo,
            current_streak: self.current_streak,
            max_streak: self.max_streak,
            total_patterns: self.total_patterns,
            perfect_patterns: self.perfect_patterns,
            jackpot_count: self.jackpot_count,
            total_errors: self.total_errors,
            accuracy: self.accuracy(),
            average_time_ms: self.average_time_ms(),
            perfect_count: self.perfect_count,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rank {
    S,
    A,
    B,
    C,
    D,
}

impl Rank {
    pub fn color(self) -> &'static str {
        match self {
            Rank::S => "#FFD700",
            Rank::A => "#12b886",
            Rank::B => "#4dabf7",
            Rank::C => "#fab005",
            Rank::D => "#868e96",
        }
    }
}

/// Session rank for endless Flow play.
pub fn calculate_rank(score: u64) -> Rank {
    rank_with_thresholds(score, [10_000, 7_500, 5_000, 2_500])
}

/// Rank for the five-pattern daily run.
pub fn daily_rank(score: u64) -> Rank {
    rank_with_thresholds(score, [2_000, 1_500, 1_000, 500])
}

fn rank_with_thresholds(score: u64, [s, a, b, c]: [u64; 4]) -> Rank {
    if score >= s {
        Rank::S
    } else if score >= a {
        Rank::A
    } else if score >= b {
        Rank::B
    } else if score >= c {
        Rank::C
    } else {
        Rank::D
    }
}

/// Thousands separated by spaces: `12 345`.
pub fn format_score(score: u64) -> String {
    let digits = score.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

pub fn format_combo(combo: f64) -> String {
    format!("×{combo:.1}")
}

pub fn format_time(ms: u64) -> String {
    format!("{}.{}s", ms / 1_000, (ms % 1_000) / 100)
}
