use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::constants::DAILY_PATTERN_COUNT;
use crate::pattern::{DailyDifficulty, PatternEngine};
use crate::scoring::{daily_rank, Rank};
use crate::types::{Cell, Path};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub total_score: u64,
    pub perfect_count: u32,
    pub total_errors: u32,
    pub total_time_ms: u64,
    pub attempts: u32,
}

/// Summary stored once a day's challenge has been finished.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyResult {
    pub date: NaiveDate,
    pub stats: DailyStats,
    pub rank: Rank,
}

/// The fixed five-pattern challenge everyone gets on a given date.
#[derive(Clone, Debug)]
pub struct DailyRun {
    date: NaiveDate,
    patterns: Vec<Path>,
    index: usize,
    stats: DailyStats,
}

impl DailyRun {
    pub fn new(date: NaiveDate) -> Self {
        let mut engine = PatternEngine::daily(date);
        let patterns =
            engine.generate_daily_sequence(DAILY_PATTERN_COUNT, DailyDifficulty::Progressive);
        tracing::debug!(%date, patterns = patterns.len(), "[daily] challenge generated");
        Self {
            date,
            patterns,
            index: 0,
            stats: DailyStats::default(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn patterns(&self) -> &[Path] {
        &self.patterns
    }

    pub fn current_pattern(&self) -> Option<&[Cell]> {
        self.patterns.get(self.index).map(Vec::as_slice)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn stats(&self) -> DailyStats {
        self.stats
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.patterns.len()
    }

    pub fn progress(&self) -> f64 {
        if self.patterns.is_empty() {
            return 1.0;
        }
        self.index as f64 / self.patterns.len() as f64
    }

    /// Records one attempt at the current pattern. Only a completed attempt
    /// moves on to the next pattern.
    pub fn record_attempt(&mut self, score: u64, errors: u32, time_ms: u64, completed: bool) {
        if self.is_complete() {
            return;
        }
        self.stats.attempts += 1;
        self.stats.total_errors += errors;
        self.stats.total_time_ms += time_ms;
        if !completed {
            return;
        }
        self.stats.total_score += score;
        if errors == 0 {
            self.stats.perfect_count += 1;
        }
        self.index += 1;
    }

    pub fn rank(&self) -> Rank {
        daily_rank(self.stats.total_score)
    }

    pub fn result(&self) -> Option<DailyResult> {
        self.is_complete().then(|| DailyResult {
            date: self.date,
            stats: self.stats,
            rank: self.rank(),
        })
    }
}
