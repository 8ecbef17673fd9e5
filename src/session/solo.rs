use serde::Serialize;

use crate::champion::ChampionEvent;
use crate::constants::{LEGACY_GRID, SOLO_LIVES};
use crate::grid::{enrich_grid, pick_heart_cell, solo_decoys, GridContentConfig};
use crate::path::generate_path;
use crate::rng::RandomSource;
use crate::types::{Resources, RunCounters};
use crate::xp::{SoloEnd, SoloXp, XpTable};

use super::legacy::{BoardRole, BoardSetup, LegacyBoard};
use super::{PatternSession, SessionOutcome};

/// End-of-floor summary shown before the player continues or abandons.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorEnd {
    pub status: SoloEnd,
    pub stage: u32,
    pub time_seconds: u64,
    pub lives_left: u32,
    pub perfect: bool,
    pub xp: SoloXp,
    pub champion_event: ChampionEvent,
    pub resources: Resources,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoloReward {
    pub xp: u64,
    pub champion_xp: u64,
}

/// A solo run: consecutive floors sharing lives, run quotas and one chrono.
pub struct SoloRun {
    config: GridContentConfig,
    bonus_chance_modifier: f64,
    level: u32,
    lives_used: u32,
    counters: RunCounters,
    resources: Resources,
    chrono_ms: u64,
    board: LegacyBoard,
    pending: Option<FloorEnd>,
    finished: bool,
}

impl SoloRun {
    /// Starts a run at level 0 with fresh run quotas.
    pub fn new(
        config: GridContentConfig,
        bonus_chance_modifier: f64,
        rng: &mut impl RandomSource,
    ) -> Self {
        let mut counters = RunCounters::default();
        let board = build_floor(&config, 0, 0, &mut counters, bonus_chance_modifier, rng);
        Self {
            config,
            bonus_chance_modifier,
            level: 0,
            lives_used: 0,
            counters,
            resources: Resources::default(),
            chrono_ms: 0,
            board,
            pending: None,
            finished: false,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn floor(&self) -> u32 {
        self.level + 1
    }

    pub fn lives_used(&self) -> u32 {
        self.lives_used
    }

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    pub fn resources(&self) -> Resources {
        self.resources
    }

    /// Run time so far. A settled board has already been folded in.
    pub fn chrono_ms(&self, now_ms: u64) -> u64 {
        if self.pending.is_some() || self.finished {
            return self.chrono_ms;
        }
        self.chrono_ms + self.board.chrono_ms(now_ms)
    }

    pub fn board(&self) -> &LegacyBoard {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut LegacyBoard {
        &mut self.board
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn pending_end(&self) -> Option<&FloorEnd> {
        self.pending.as_ref()
    }

    pub fn start(&mut self, now_ms: u64) {
        self.board.start(now_ms);
    }

    /// Advances the current board and reports the floor summary once it settles.
    pub fn tick(&mut self, now_ms: u64, xp_table: &XpTable) -> Option<FloorEnd> {
        self.board.advance(now_ms);
        if self.pending.is_some() || self.finished {
            return None;
        }
        let outcome = self.board.outcome()?;
        let (status, time_ms) = match outcome {
            SessionOutcome::Won { time_ms } => (SoloEnd::Completed, time_ms),
            SessionOutcome::Lost { time_ms } => (SoloEnd::NoLifeLeft, time_ms),
        };
        self.chrono_ms += time_ms;
        self.lives_used = self.board.lives_used();
        self.resources.merge(self.board.resources());

        let stage = self.level + 1;
        let time_seconds = self.chrono_ms / 1_000;
        let lives_left = SOLO_LIVES.saturating_sub(self.lives_used);
        let perfect = status == SoloEnd::Completed && self.board.misses() == 0;
        let champion_event = if perfect {
            ChampionEvent::PerfectStage
        } else if lives_left == SOLO_LIVES {
            ChampionEvent::FinishWithThreeHearts
        } else {
            ChampionEvent::FinishStage
        };
        let end = FloorEnd {
            status,
            stage,
            time_seconds,
            lives_left,
            perfect,
            xp: xp_table.solo_xp(stage, time_seconds as f64, status),
            champion_event,
            resources: self.resources,
        };
        tracing::info!(stage, status = ?status, time_seconds, lives_left, "[solo] floor ended");
        self.pending = Some(end.clone());
        Some(end)
    }

    /// Accepts the pending summary. A cleared floor moves on to the next one;
    /// a lost floor ends the run.
    pub fn continue_run(&mut self, rng: &mut impl RandomSource) -> Option<SoloReward> {
        let end = self.pending.take()?;
        let reward = SoloReward {
            xp: end.xp.total_xp,
            champion_xp: end.champion_event.xp(),
        };
        match end.status {
            SoloEnd::Completed => {
                self.level += 1;
                self.prepare_next_level(rng);
            }
            _ => self.finish(),
        }
        Some(reward)
    }

    /// Leaves with the abandon multiplier applied to the pending summary.
    pub fn abandon(&mut self, xp_table: &XpTable) -> Option<SoloReward> {
        let end = self.pending.take()?;
        let xp = xp_table.solo_xp(end.stage, end.time_seconds as f64, SoloEnd::Abandon);
        self.finish();
        Some(SoloReward {
            xp: xp.total_xp,
            champion_xp: 0,
        })
    }

    fn finish(&mut self) {
        self.board.teardown();
        self.finished = true;
    }

    fn prepare_next_level(&mut self, rng: &mut impl RandomSource) {
        self.board.teardown();
        self.board = build_floor(
            &self.config,
            self.level,
            self.lives_used,
            &mut self.counters,
            self.bonus_chance_modifier,
            rng,
        );
    }
}

fn build_floor(
    config: &GridContentConfig,
    level: u32,
    lives_used: u32,
    counters: &mut RunCounters,
    bonus_chance_modifier: f64,
    rng: &mut impl RandomSource,
) -> LegacyBoard {
    let path = generate_path(rng, LEGACY_GRID);
    let heart = if lives_used > 0 {
        pick_heart_cell(&path, rng)
    } else {
        None
    };
    let floor = (level + 1).max(1);
    let enriched = enrich_grid(
        config,
        LEGACY_GRID,
        &path,
        floor,
        *counters,
        bonus_chance_modifier,
        rng,
    );
    *counters = enriched.run_counters;
    let decoys = solo_decoys(&path, LEGACY_GRID, level, rng);
    tracing::debug!(floor, lives_used, decoys = decoys.len(), "[solo] floor prepared");

    let mut setup = BoardSetup::new(path);
    setup.grid = Some(enriched.grid);
    setup.decoys = decoys;
    setup.heart = heart;
    setup.lives_used = lives_used;
    LegacyBoard::new(BoardRole::Solo, setup)
}
