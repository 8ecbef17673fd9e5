use serde::{Deserialize, Serialize};

use crate::constants::{
    observe_time_ms, BASE_BPM, COMBO_INCREMENT, COMBO_START, ERROR_TOLERANCE,
    FLOW_CHAIN_PREVIEW_MS, JACKPOT_BONUS, JACKPOT_STREAK, QUICK_PREVIEW_MS, REWARD_DISPLAY_MS,
    TRANSITION_MS,
};
use crate::pattern::{PatternEngine, PatternOptions};
use crate::rng::RandomSource;
use crate::scoring::{decide_next_branch, next_tempo, pattern_score, Branch, PatternRecord, ScoreManager};
use crate::types::{Cell, Path};

use super::timer::Timer;
use super::{ClickOutcome, GameMode, PatternSession, SessionEvent, SessionOutcome};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowPhase {
    #[default]
    Observe,
    Input,
    Reward,
    Transition,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub phase: FlowPhase,
    pub branch: Branch,
    pub pattern: Path,
    pub pattern_index: usize,
    pub errors_in_pattern: u32,
    pub combo: f64,
    pub streak: u32,
    pub perfect_count: u32,
    #[serde(rename = "tempoBPM")]
    pub tempo_bpm: u32,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            phase: FlowPhase::Observe,
            branch: Branch::FullPreview,
            pattern: Vec::new(),
            pattern_index: 0,
            errors_in_pattern: 0,
            combo: COMBO_START,
            streak: 0,
            perfect_count: 0,
            tempo_bpm: BASE_BPM,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Paused {
    remaining_ms: Option<u64>,
    input_elapsed_ms: Option<u64>,
}

/// OBSERVE → INPUT → REWARD → TRANSITION loop over generated patterns.
///
/// Completion time is measured from the moment input opens, so the preview
/// length never counts against the player.
#[derive(Debug)]
pub struct FlowController<R> {
    engine: PatternEngine<R>,
    state: FlowState,
    score: ScoreManager,
    phase_timer: Timer,
    input_started_at: Option<u64>,
    paused: Option<Paused>,
    started: bool,
    events: Vec<SessionEvent>,
}

impl<R: RandomSource> FlowController<R> {
    pub fn new(engine: PatternEngine<R>) -> Self {
        Self {
            engine,
            state: FlowState::default(),
            score: ScoreManager::new(),
            phase_timer: Timer::default(),
            input_started_at: None,
            paused: None,
            started: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn score(&self) -> &ScoreManager {
        &self.score
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }

    pub fn phase_remaining_ms(&self, now_ms: u64) -> Option<u64> {
        match self.paused {
            Some(paused) => paused.remaining_ms,
            None => self.phase_timer.remaining(now_ms),
        }
    }

    pub fn begin(&mut self, now_ms: u64) {
        tracing::debug!("[flow] starting");
        self.started = true;
        self.paused = None;
        self.start_new_pattern(now_ms);
    }

    /// Stops every timer and parks the machine in OBSERVE.
    pub fn stop(&mut self) {
        tracing::debug!("[flow] stopping");
        self.cleanup();
        self.started = false;
        self.change_phase(FlowPhase::Observe);
    }

    pub fn pause(&mut self, now_ms: u64) {
        if self.paused.is_some() || !self.started {
            return;
        }
        let input_elapsed_ms = match self.state.phase {
            FlowPhase::Input => self.input_started_at.map(|at| now_ms.saturating_sub(at)),
            _ => None,
        };
        self.paused = Some(Paused {
            remaining_ms: self.phase_timer.remaining(now_ms),
            input_elapsed_ms,
        });
        self.phase_timer.cancel();
        tracing::debug!(phase = ?self.state.phase, "[flow] paused");
    }

    /// Re-enters the phase that was active at pause time with the time it had left.
    pub fn resume(&mut self, now_ms: u64) {
        let Some(paused) = self.paused.take() else {
            return;
        };
        if let Some(remaining) = paused.remaining_ms {
            self.phase_timer.schedule(now_ms, remaining);
        }
        if let Some(elapsed) = paused.input_elapsed_ms {
            self.input_started_at = Some(now_ms.saturating_sub(elapsed));
        }
        tracing::debug!(phase = ?self.state.phase, "[flow] resumed");
    }

    fn cleanup(&mut self) {
        self.phase_timer.cancel();
        self.paused = None;
    }

    fn change_phase(&mut self, phase: FlowPhase) {
        if self.state.phase != phase {
            tracing::trace!(from = ?self.state.phase, to = ?phase, "[flow] phase");
        }
        self.state.phase = phase;
        self.events.push(SessionEvent::PhaseChanged { phase });
    }

    fn change_branch(&mut self, branch: Branch) {
        self.state.branch = branch;
        self.events.push(SessionEvent::BranchChanged { branch });
    }

    fn set_tempo(&mut self, bpm: u32) {
        if self.state.tempo_bpm != bpm {
            self.state.tempo_bpm = bpm;
            self.events.push(SessionEvent::TempoChanged { bpm });
        }
    }

    fn start_new_pattern(&mut self, now_ms: u64) {
        self.cleanup();
        self.state.pattern = self.engine.generate_pattern(None, PatternOptions::default());
        self.state.pattern_index = 0;
        self.state.errors_in_pattern = 0;
        self.enter_observe(now_ms);
    }

    fn observe_time_for_branch(&self) -> u64 {
        match self.state.branch {
            Branch::FlowChain => FLOW_CHAIN_PREVIEW_MS,
            Branch::QuickPreview => QUICK_PREVIEW_MS,
            Branch::FullPreview => observe_time_ms(self.state.pattern.len()),
        }
    }

    fn enter_observe(&mut self, now_ms: u64) {
        self.change_phase(FlowPhase::Observe);
        self.input_started_at = None;
        let observe_ms = self.observe_time_for_branch();
        self.phase_timer.schedule(now_ms, observe_ms);
    }

    fn enter_input(&mut self, now_ms: u64) {
        self.change_phase(FlowPhase::Input);
        self.input_started_at = Some(now_ms);
    }

    pub fn on_cell_click(&mut self, cell: Cell, now_ms: u64) -> ClickOutcome {
        if self.state.phase != FlowPhase::Input || self.paused.is_some() {
            return ClickOutcome::Ignored;
        }
        let Some(expected) = self.state.pattern.get(self.state.pattern_index).copied() else {
            return ClickOutcome::Ignored;
        };

        if cell == expected {
            self.state.combo += COMBO_INCREMENT;
            self.score.update_combo(self.state.combo);
            self.events.push(SessionEvent::ComboChanged {
                combo: self.state.combo,
            });
            self.state.pattern_index += 1;
            self.events.push(SessionEvent::Correct {
                cell,
                next_index: self.state.pattern_index,
            });
            if self.state.pattern_index >= self.state.pattern.len() {
                self.enter_reward(now_ms);
                return ClickOutcome::Completed;
            }
            return ClickOutcome::Correct {
                next_index: self.state.pattern_index,
            };
        }

        self.state.errors_in_pattern += 1;
        if self.state.errors_in_pattern >= ERROR_TOLERANCE {
            self.reset_pattern(now_ms);
            return ClickOutcome::PatternReset;
        }
        self.events.push(SessionEvent::ErrorTolerated {
            cell,
            errors: self.state.errors_in_pattern,
        });
        ClickOutcome::Tolerated {
            errors: self.state.errors_in_pattern,
        }
    }

    // Same pattern again, from a full preview, with the run bonuses cleared.
    fn reset_pattern(&mut self, now_ms: u64) {
        tracing::debug!("[flow] too many errors, replaying pattern");
        self.state.combo = COMBO_START;
        self.score.reset_combo();
        self.state.streak = 0;
        self.state.perfect_count = 0;
        self.set_tempo(next_tempo(self.state.tempo_bpm, false));
        self.change_branch(Branch::FullPreview);
        self.state.pattern_index = 0;
        self.state.errors_in_pattern = 0;
        self.events.push(SessionEvent::PatternRestarted);
        self.enter_observe(now_ms);
    }

    fn enter_reward(&mut self, now_ms: u64) {
        self.change_phase(FlowPhase::Reward);
        let perfect = self.state.errors_in_pattern == 0;
        let time_ms = self
            .input_started_at
            .map(|at| now_ms.saturating_sub(at))
            .unwrap_or(0);
        let points = pattern_score(self.state.pattern.len(), self.state.combo, perfect);
        self.score.add_score(points);

        let record = PatternRecord {
            length: self.state.pattern.len(),
            perfect,
            errors: self.state.errors_in_pattern,
            time_ms,
            score: points,
            combo: self.state.combo,
        };
        self.score.record_pattern(record);
        self.events.push(SessionEvent::PatternCompleted { record });

        if perfect {
            self.state.streak += 1;
            self.state.perfect_count += 1;
            if self.state.perfect_count >= JACKPOT_STREAK {
                self.state.perfect_count = 0;
                self.score.record_jackpot();
                self.events.push(SessionEvent::Jackpot {
                    bonus: JACKPOT_BONUS,
                });
            }
            self.set_tempo(next_tempo(self.state.tempo_bpm, true));
        } else {
            self.state.streak = 0;
            self.state.perfect_count = 0;
            self.state.combo = COMBO_START;
            self.score.reset_combo();
            self.set_tempo(next_tempo(self.state.tempo_bpm, false));
        }

        tracing::debug!(points, perfect, time_ms, "[flow] pattern complete");
        self.change_branch(decide_next_branch(perfect, time_ms));
        self.phase_timer.schedule(now_ms, REWARD_DISPLAY_MS);
    }

    fn enter_transition(&mut self, now_ms: u64) {
        self.change_phase(FlowPhase::Transition);
        self.phase_timer.schedule(now_ms, TRANSITION_MS);
    }

    pub fn tick(&mut self, now_ms: u64) {
        if self.paused.is_some() || !self.phase_timer.fire(now_ms) {
            return;
        }
        match self.state.phase {
            FlowPhase::Observe => self.enter_input(now_ms),
            FlowPhase::Reward => self.enter_transition(now_ms),
            FlowPhase::Transition => self.start_new_pattern(now_ms),
            FlowPhase::Input => {}
        }
    }
}

impl<R: RandomSource + Send> PatternSession for FlowController<R> {
    fn mode(&self) -> GameMode {
        GameMode::Flow
    }

    fn start(&mut self, now_ms: u64) {
        self.begin(now_ms);
    }

    fn pattern(&self) -> &[Cell] {
        &self.state.pattern
    }

    fn pattern_visible(&self) -> bool {
        self.state.phase == FlowPhase::Observe && self.started
    }

    fn accepts_input(&self) -> bool {
        self.state.phase == FlowPhase::Input && self.paused.is_none()
    }

    fn click(&mut self, cell: Cell, now_ms: u64) -> ClickOutcome {
        self.on_cell_click(cell, now_ms)
    }

    fn advance(&mut self, now_ms: u64) {
        self.tick(now_ms);
    }

    fn progress(&self) -> f64 {
        if self.state.pattern.is_empty() {
            return 0.0;
        }
        (self.state.pattern_index as f64 / self.state.pattern.len() as f64).clamp(0.0, 1.0)
    }

    fn outcome(&self) -> Option<SessionOutcome> {
        None
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn teardown(&mut self) {
        self.cleanup();
        self.started = false;
    }
}
