use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::constants::{FLOW_GRID, PATTERN_MAX_ATTEMPTS, PATTERN_MAX_LENGTH, PATTERN_MIN_LENGTH};
use crate::rng::{daily_seed, RandomSource, SeededRandom, ThreadRandom};
use crate::types::{Cell, GridSize, Path};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatternOptions {
    pub allow_diagonal: bool,
    pub max_attempts: usize,
    pub start_cell: Option<Cell>,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            allow_diagonal: true,
            max_attempts: PATTERN_MAX_ATTEMPTS,
            start_cell: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyDifficulty {
    #[default]
    Progressive,
    Easy,
    Medium,
    Hard,
}

/// Flow-mode pattern generator over an injected random source.
#[derive(Debug)]
pub struct PatternEngine<R> {
    rng: R,
    size: GridSize,
    fallbacks: u32,
}

impl PatternEngine<ThreadRandom> {
    pub fn random() -> Self {
        Self::new(ThreadRandom)
    }
}

impl PatternEngine<SeededRandom> {
    pub fn seeded(seed: i64) -> Self {
        Self::new(SeededRandom::new(seed))
    }

    /// Same sequence for every player on a given calendar day.
    pub fn daily(date: NaiveDate) -> Self {
        Self::seeded(daily_seed(date))
    }
}

impl<R: RandomSource> PatternEngine<R> {
    pub fn new(rng: R) -> Self {
        Self::with_size(rng, FLOW_GRID)
    }

    pub fn with_size(rng: R, size: GridSize) -> Self {
        Self {
            rng,
            size,
            fallbacks: 0,
        }
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Number of patterns that fell back to a straight run.
    pub fn fallback_count(&self) -> u32 {
        self.fallbacks
    }

    /// Builds a connected walk with no repeated cell. A requested length is
    /// clamped into `[PATTERN_MIN_LENGTH, PATTERN_MAX_LENGTH]`; `None` picks one.
    pub fn generate_pattern(&mut self, length: Option<usize>, options: PatternOptions) -> Path {
        let target = match length {
            Some(length) => length.clamp(PATTERN_MIN_LENGTH, PATTERN_MAX_LENGTH),
            None => self
                .rng
                .int(PATTERN_MIN_LENGTH as i32, PATTERN_MAX_LENGTH as i32) as usize,
        };

        for _ in 0..options.max_attempts {
            let start = options.start_cell.unwrap_or_else(|| self.random_cell());
            let mut pattern = vec![start];
            while pattern.len() < target {
                let Some(last) = pattern.last().copied() else {
                    break;
                };
                match self.random_free_neighbor(last, &pattern, options.allow_diagonal) {
                    Some(next) => pattern.push(next),
                    None => break,
                }
            }
            if pattern.len() == target {
                return pattern;
            }
        }

        tracing::warn!(length = target, "[pattern] generation stuck, using straight fallback");
        self.fallbacks += 1;
        self.fallback_pattern(target)
    }

    fn random_cell(&mut self) -> Cell {
        Cell::new(
            self.rng.int(0, self.size.rows - 1),
            self.rng.int(0, self.size.cols - 1),
        )
    }

    fn random_free_neighbor(&mut self, cell: Cell, pattern: &[Cell], allow_diagonal: bool) -> Option<Cell> {
        let neighbors: Vec<Cell> = if allow_diagonal {
            cell.all_neighbors().to_vec()
        } else {
            cell.orthogonal_neighbors().to_vec()
        };
        let available: Vec<Cell> = neighbors
            .into_iter()
            .filter(|n| self.size.contains(*n) && !pattern.contains(n))
            .collect();
        if available.is_empty() {
            return None;
        }
        let idx = self.rng.int(0, available.len() as i32 - 1) as usize;
        available.get(idx).copied()
    }

    fn fallback_pattern(&mut self, length: usize) -> Path {
        let row = self.rng.int(0, self.size.rows - 1);
        let start_col = self.rng.int(0, (self.size.cols - length as i32).max(0));
        (0..length as i32)
            .map(|offset| Cell::new(row, start_col + offset))
            .collect()
    }

    /// Daily sequence: `Progressive` climbs from the shortest to the longest
    /// length; the fixed difficulties reuse one length.
    pub fn generate_daily_sequence(&mut self, count: usize, difficulty: DailyDifficulty) -> Vec<Path> {
        let span = PATTERN_MAX_LENGTH - PATTERN_MIN_LENGTH;
        (0..count)
            .map(|idx| {
                let length = match difficulty {
                    DailyDifficulty::Progressive if count > 1 => {
                        PATTERN_MIN_LENGTH + (idx * span) / (count - 1)
                    }
                    DailyDifficulty::Progressive | DailyDifficulty::Easy => PATTERN_MIN_LENGTH,
                    DailyDifficulty::Medium => (PATTERN_MIN_LENGTH + PATTERN_MAX_LENGTH) / 2,
                    DailyDifficulty::Hard => PATTERN_MAX_LENGTH,
                };
                self.generate_pattern(Some(length), PatternOptions::default())
            })
            .collect()
    }

    pub fn validate(&self, pattern: &[Cell]) -> bool {
        validate_pattern(pattern, self.size)
    }
}

/// Long enough, inside the grid, and each step at most one diagonal away.
pub fn validate_pattern(pattern: &[Cell], size: GridSize) -> bool {
    if pattern.len() < PATTERN_MIN_LENGTH {
        return false;
    }
    if !pattern.iter().all(|cell| size.contains(*cell)) {
        return false;
    }
    pattern.windows(2).all(|pair| pair[0].manhattan(pair[1]) <= 2)
}
