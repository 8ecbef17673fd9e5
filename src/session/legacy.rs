use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::constants::{
    flip_back_total_ms, DECOY_ROLLBACK, DEFAULT_GOLD_VALUE, HEART_FLASH_MS, REVEAL_MS,
    REVEAL_TICK_MS, SHAKE_MS, SOLO_LIVES, STUN_MS, TRAP_ROLLBACK,
};
use crate::types::{Cell, CellContent, Grid, Path, PathBonus, Resources, TrapKind};

use super::timer::{Ticker, Timer};
use super::{ClickOutcome, GameMode, PatternSession, Pickup, SessionEvent, SessionOutcome};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardPhase {
    #[default]
    Idle,
    Show,
    Input,
    Result,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardRole {
    Solo,
    Versus,
}

/// Everything a board needs for one floor or round.
#[derive(Clone, Debug, PartialEq)]
pub struct BoardSetup {
    pub path: Path,
    /// Enriched content. Without it every off-path cell counts as a wrong cell.
    pub grid: Option<Grid>,
    pub decoys: Vec<Cell>,
    pub heart: Option<Cell>,
    /// Solo lives already spent earlier in the run.
    pub lives_used: u32,
    pub reveal_ms: u64,
    /// Versus: shared match start. The chrono counts from the end of the reveal.
    pub shared_start_at_ms: Option<u64>,
}

impl BoardSetup {
    pub fn new(path: Path) -> Self {
        Self {
            path,
            grid: None,
            decoys: Vec::new(),
            heart: None,
            lives_used: 0,
            reveal_ms: REVEAL_MS,
            shared_start_at_ms: None,
        }
    }
}

/// Reveal, input and result loop for solo floors and versus rounds.
#[derive(Debug)]
pub struct LegacyBoard {
    role: BoardRole,
    path: Path,
    grid: Option<Grid>,
    decoys: HashSet<Cell>,
    heart: Option<Cell>,
    reveal_ms: u64,
    shared_start_at_ms: Option<u64>,

    phase: BoardPhase,
    next_index: usize,
    correct: HashSet<Cell>,
    wrong: HashSet<Cell>,
    collected: HashSet<Cell>,
    lives_used: u32,
    misses: u32,
    resources: Resources,
    frozen_clicks: u32,
    frozen: bool,
    blocked: bool,
    stunned: bool,
    shaking: bool,
    just_lost: bool,
    pending_outcome: Option<bool>,
    outcome: Option<SessionOutcome>,

    chrono_started_at: Option<u64>,
    chrono_ms: u64,

    reveal_timer: Timer,
    reveal_ticker: Ticker,
    block_timer: Timer,
    shake_timer: Timer,
    heart_flash_timer: Timer,
    flip_back_timer: Timer,

    events: Vec<SessionEvent>,
}

impl LegacyBoard {
    pub fn new(role: BoardRole, setup: BoardSetup) -> Self {
        Self {
            role,
            path: setup.path,
            grid: setup.grid,
            decoys: setup.decoys.into_iter().collect(),
            heart: setup.heart,
            reveal_ms: setup.reveal_ms,
            shared_start_at_ms: setup.shared_start_at_ms,
            phase: BoardPhase::Idle,
            next_index: 0,
            correct: HashSet::new(),
            wrong: HashSet::new(),
            collected: HashSet::new(),
            lives_used: setup.lives_used,
            misses: 0,
            resources: Resources::default(),
            frozen_clicks: 0,
            frozen: false,
            blocked: false,
            stunned: false,
            shaking: false,
            just_lost: false,
            pending_outcome: None,
            outcome: None,
            chrono_started_at: None,
            chrono_ms: 0,
            reveal_timer: Timer::default(),
            reveal_ticker: Ticker::new(REVEAL_TICK_MS),
            block_timer: Timer::default(),
            shake_timer: Timer::default(),
            heart_flash_timer: Timer::default(),
            flip_back_timer: Timer::default(),
            events: Vec::new(),
        }
    }

    pub fn role(&self) -> BoardRole {
        self.role
    }

    pub fn phase(&self) -> BoardPhase {
        self.phase
    }

    /// Path shown face up (reveal and result).
    pub fn revealed(&self) -> bool {
        matches!(self.phase, BoardPhase::Show | BoardPhase::Result)
    }

    pub fn in_play(&self) -> bool {
        self.phase == BoardPhase::Input
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn expected_cell(&self) -> Option<Cell> {
        self.path.get(self.next_index).copied()
    }

    pub fn is_correct(&self, cell: Cell) -> bool {
        self.correct.contains(&cell)
    }

    pub fn is_wrong(&self, cell: Cell) -> bool {
        self.wrong.contains(&cell)
    }

    pub fn lives_used(&self) -> u32 {
        self.lives_used
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn resources(&self) -> Resources {
        self.resources
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn is_stunned(&self) -> bool {
        self.stunned
    }

    pub fn is_shaking(&self) -> bool {
        self.shaking
    }

    pub fn heart_flash(&self) -> bool {
        self.just_lost
    }

    pub fn heart(&self) -> Option<Cell> {
        self.heart
    }

    pub fn frozen_clicks(&self) -> u32 {
        self.frozen_clicks
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn reveal_remaining_ms(&self, now_ms: u64) -> u64 {
        if self.phase != BoardPhase::Show {
            return 0;
        }
        self.reveal_timer.remaining(now_ms).unwrap_or(0)
    }

    pub fn chrono_ms(&self, now_ms: u64) -> u64 {
        match self.chrono_started_at {
            Some(started) => self.chrono_ms + now_ms.saturating_sub(started),
            None => self.chrono_ms,
        }
    }

    /// Mirrors the room's freeze counter onto the board.
    pub fn apply_freeze(&mut self, clicks: u32) {
        self.frozen_clicks = clicks;
        self.frozen = clicks > 0;
    }

    pub fn start_reveal(&mut self, now_ms: u64) {
        self.reveal_timer.cancel();
        self.reveal_ticker.stop();
        self.phase = BoardPhase::Show;
        self.reveal_timer.schedule(now_ms, self.reveal_ms);
        self.reveal_ticker.start(now_ms);
        self.events.push(SessionEvent::RevealStarted {
            duration_ms: self.reveal_ms,
        });
    }

    fn open_input(&mut self, now_ms: u64) {
        self.reveal_ticker.stop();
        self.phase = BoardPhase::Input;
        self.start_chrono(now_ms);
        self.events.push(SessionEvent::InputOpened);
    }

    fn start_chrono(&mut self, now_ms: u64) {
        match self.shared_start_at_ms {
            Some(start_at) => {
                self.chrono_ms = 0;
                self.chrono_started_at = Some(start_at + self.reveal_ms);
            }
            None => self.chrono_started_at = Some(now_ms),
        }
    }

    fn stop_chrono(&mut self, now_ms: u64) {
        self.chrono_ms = self.chrono_ms(now_ms);
        self.chrono_started_at = None;
    }

    fn content(&self, cell: Cell) -> Option<CellContent> {
        self.grid.as_ref().and_then(|grid| grid.get(cell)).copied()
    }

    pub fn handle_click(&mut self, cell: Cell, now_ms: u64) -> ClickOutcome {
        if self.phase != BoardPhase::Input || self.blocked {
            return ClickOutcome::Ignored;
        }

        if let Some(outcome) = self.try_collect_bonus(cell, now_ms) {
            return outcome;
        }

        if self.correct.contains(&cell) || self.wrong.contains(&cell) {
            return ClickOutcome::Ignored;
        }

        if self.role == BoardRole::Versus && self.frozen {
            if self.frozen_clicks > 0 {
                self.frozen_clicks -= 1;
                self.events.push(SessionEvent::FrozenClick {
                    clicks_left: self.frozen_clicks,
                });
                if self.frozen_clicks == 0 {
                    self.frozen = false;
                    self.events.push(SessionEvent::Unfrozen);
                }
                return ClickOutcome::Frozen {
                    clicks_left: self.frozen_clicks,
                };
            }
            return ClickOutcome::Ignored;
        }

        if self.expected_cell() == Some(cell) {
            return self.accept_correct(cell, now_ms);
        }
        self.resolve_miss(cell, now_ms)
    }

    // Bonus collection checks only the expected row, not the column.
    fn try_collect_bonus(&mut self, cell: Cell, now_ms: u64) -> Option<ClickOutcome> {
        let content = self.content(cell)?;
        if !content.is_bonus() || self.collected.contains(&cell) {
            return None;
        }
        let expected = self.expected_cell()?;
        if expected.row != cell.row {
            return None;
        }

        let pickup = match content {
            CellContent::Gold { value } => {
                let value = if value == 0 { DEFAULT_GOLD_VALUE } else { value };
                Pickup::Gold(value)
            }
            CellContent::Gem => Pickup::Gem,
            CellContent::Essence => Pickup::Essence(1),
            _ => Pickup::Potion,
        };
        self.correct.insert(cell);
        self.collected.insert(cell);
        self.next_index += 1;
        self.apply_pickup(cell, pickup);

        if self.next_index == self.path.len() {
            self.complete(true, now_ms);
            return Some(ClickOutcome::Completed);
        }
        Some(ClickOutcome::Collected {
            pickup,
            next_index: self.next_index,
        })
    }

    fn apply_pickup(&mut self, cell: Cell, pickup: Pickup) {
        match pickup {
            Pickup::Gold(value) => self.resources.gold += u64::from(value),
            Pickup::Gem => self.resources.gems += 1,
            Pickup::Essence(value) => self.resources.essence += u64::from(value),
            Pickup::Potion | Pickup::Heart => {
                self.lives_used = self.lives_used.saturating_sub(1);
            }
        }
        self.events.push(SessionEvent::Picked { cell, pickup });
    }

    fn accept_correct(&mut self, cell: Cell, now_ms: u64) -> ClickOutcome {
        self.correct.insert(cell);
        self.next_index += 1;
        self.events.push(SessionEvent::Correct {
            cell,
            next_index: self.next_index,
        });

        if let Some(CellContent::Path { bonus: Some(bonus) }) = self.content(cell) {
            if self.collected.insert(cell) {
                let pickup = match bonus {
                    PathBonus::Gold(value) => Pickup::Gold(value),
                    PathBonus::Essence(value) => Pickup::Essence(value),
                };
                self.apply_pickup(cell, pickup);
            }
        }

        if self.role == BoardRole::Solo && self.heart == Some(cell) {
            self.heart = None;
            self.apply_pickup(cell, Pickup::Heart);
        }

        if self.next_index == self.path.len() {
            self.complete(true, now_ms);
            return ClickOutcome::Completed;
        }
        ClickOutcome::Correct {
            next_index: self.next_index,
        }
    }

    fn resolve_miss(&mut self, cell: Cell, now_ms: u64) -> ClickOutcome {
        self.misses += 1;

        if self.role == BoardRole::Solo && self.decoys.contains(&cell) {
            let from = self.next_index;
            let to = self.rewind(DECOY_ROLLBACK);
            self.events.push(SessionEvent::DecoyRollback { cell, from, to });
            return ClickOutcome::Decoy { next_index: to };
        }

        self.wrong.insert(cell);
        self.events.push(SessionEvent::Miss { cell });
        let content = self.content(cell);
        let trap = content.and_then(|content| content.trap());

        if trap == Some(TrapKind::Stun) && self.role == BoardRole::Solo {
            self.blocked = true;
            self.stunned = true;
            self.block_timer.schedule(now_ms, STUN_MS);
            let until_ms = now_ms + STUN_MS;
            self.events.push(SessionEvent::Stunned { cell, until_ms });
            return ClickOutcome::Stunned { until_ms };
        }

        self.shaking = true;
        self.blocked = true;
        self.just_lost = true;
        self.shake_timer.schedule(now_ms, SHAKE_MS);
        self.block_timer.schedule(now_ms, SHAKE_MS);
        self.heart_flash_timer.schedule(now_ms, HEART_FLASH_MS);

        if trap == Some(TrapKind::RollbackTwo) {
            let from = self.next_index;
            let to = self.rewind(TRAP_ROLLBACK);
            self.events.push(SessionEvent::TrapRollback { cell, from, to });
            return ClickOutcome::Rollback { next_index: to };
        }

        if content == Some(CellContent::Neutral) {
            return ClickOutcome::Neutral;
        }

        self.lives_used += 1;
        self.events.push(SessionEvent::LifeLost {
            cell,
            lives_used: self.lives_used,
        });
        if self.role == BoardRole::Solo && self.lives_used >= SOLO_LIVES {
            self.complete(false, now_ms);
            return ClickOutcome::Failed;
        }
        ClickOutcome::LifeLost {
            lives_used: self.lives_used,
        }
    }

    /// Steps `next_index` back and clears the rewound path cells.
    fn rewind(&mut self, steps: usize) -> usize {
        let from = self.next_index;
        let to = from.saturating_sub(steps);
        for idx in (to..from).rev() {
            match self.path.get(idx) {
                Some(cell) => {
                    self.correct.remove(cell);
                }
                None => break,
            }
        }
        self.next_index = to;
        to
    }

    /// Versus: the room ran out of lives for this player.
    pub fn force_failure(&mut self, now_ms: u64) {
        if self.phase == BoardPhase::Input || self.phase == BoardPhase::Show {
            self.complete(false, now_ms);
        }
    }

    fn complete(&mut self, won: bool, now_ms: u64) {
        self.phase = BoardPhase::Result;
        self.stop_chrono(now_ms);
        self.reveal_timer.cancel();
        self.reveal_ticker.stop();
        let duration_ms = flip_back_total_ms(self.rows());
        self.flip_back_timer.schedule(now_ms, duration_ms);
        self.pending_outcome = Some(won);
        self.events.push(SessionEvent::FlipBack { won, duration_ms });
    }

    fn rows(&self) -> i32 {
        self.grid
            .as_ref()
            .map(|grid| grid.size.rows)
            .unwrap_or(self.path.len() as i32)
    }

    pub fn tick(&mut self, now_ms: u64) {
        if self.phase == BoardPhase::Show {
            if self.reveal_timer.fire(now_ms) {
                self.open_input(now_ms);
            } else if self.reveal_ticker.poll(now_ms) > 0 {
                let remaining_ms = self.reveal_timer.remaining(now_ms).unwrap_or(0);
                self.events.push(SessionEvent::RevealTick { remaining_ms });
            }
        }

        if self.block_timer.fire(now_ms) {
            self.blocked = false;
            self.stunned = false;
            self.events.push(SessionEvent::Unblocked);
        }
        if self.shake_timer.fire(now_ms) {
            self.shaking = false;
        }
        if self.heart_flash_timer.fire(now_ms) {
            self.just_lost = false;
        }

        if self.flip_back_timer.fire(now_ms) {
            if let Some(won) = self.pending_outcome.take() {
                let time_ms = self.chrono_ms;
                let outcome = if won {
                    SessionOutcome::Won { time_ms }
                } else {
                    SessionOutcome::Lost { time_ms }
                };
                self.outcome = Some(outcome);
                self.events.push(SessionEvent::Finished { outcome });
            }
        }
    }

    pub fn clear_timers(&mut self) {
        self.reveal_timer.cancel();
        self.reveal_ticker.stop();
        self.block_timer.cancel();
        self.shake_timer.cancel();
        self.heart_flash_timer.cancel();
        self.flip_back_timer.cancel();
        self.blocked = false;
        self.stunned = false;
        self.shaking = false;
        self.just_lost = false;
    }
}

impl PatternSession for LegacyBoard {
    fn mode(&self) -> GameMode {
        match self.role {
            BoardRole::Solo => GameMode::SoloFloors,
            BoardRole::Versus => GameMode::Versus,
        }
    }

    fn start(&mut self, now_ms: u64) {
        self.start_reveal(now_ms);
    }

    fn pattern(&self) -> &[Cell] {
        &self.path
    }

    fn pattern_visible(&self) -> bool {
        self.revealed()
    }

    fn accepts_input(&self) -> bool {
        self.in_play() && !self.blocked
    }

    fn click(&mut self, cell: Cell, now_ms: u64) -> ClickOutcome {
        self.handle_click(cell, now_ms)
    }

    fn advance(&mut self, now_ms: u64) {
        self.tick(now_ms);
    }

    fn progress(&self) -> f64 {
        if self.path.is_empty() {
            return 0.0;
        }
        (self.next_index as f64 / self.path.len() as f64).clamp(0.0, 1.0)
    }

    fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn teardown(&mut self) {
        self.clear_timers();
        self.chrono_started_at = None;
    }
}
