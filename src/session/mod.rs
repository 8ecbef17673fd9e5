//! Turn/phase state machines.
//!
//! Both game loops are clock-injected: callers pass `now_ms` to every call and
//! `advance` fires whatever timers are due. Events accumulate until drained,
//! the same way the room server drains them into snapshots.

use serde::{Deserialize, Serialize};

use crate::rng::{SeededRandom, ThreadRandom};
use crate::scoring::{Branch, PatternRecord};
use crate::types::Cell;

pub mod daily;
pub mod flow;
pub mod legacy;
pub mod solo;
pub mod tempo;
pub mod timer;

pub use self::flow::{FlowController, FlowPhase, FlowState};
pub use self::legacy::{BoardPhase, BoardRole, BoardSetup, LegacyBoard};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    SoloFloors,
    Versus,
    Flow,
}

/// Something the player picked up on the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum Pickup {
    Gold(u32),
    Gem,
    Essence(u32),
    Potion,
    Heart,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClickOutcome {
    /// Not accepting input, blocked, or a repeated click.
    Ignored,
    Frozen { clicks_left: u32 },
    Collected { pickup: Pickup, next_index: usize },
    Correct { next_index: usize },
    Completed,
    Decoy { next_index: usize },
    Stunned { until_ms: u64 },
    Rollback { next_index: usize },
    Neutral,
    LifeLost { lives_used: u32 },
    Failed,
    Tolerated { errors: u32 },
    PatternReset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SessionOutcome {
    Won { time_ms: u64 },
    Lost { time_ms: u64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    RevealStarted { duration_ms: u64 },
    RevealTick { remaining_ms: u64 },
    InputOpened,
    Picked { cell: Cell, pickup: Pickup },
    Correct { cell: Cell, next_index: usize },
    Miss { cell: Cell },
    DecoyRollback { cell: Cell, from: usize, to: usize },
    TrapRollback { cell: Cell, from: usize, to: usize },
    Stunned { cell: Cell, until_ms: u64 },
    Unblocked,
    LifeLost { cell: Cell, lives_used: u32 },
    FrozenClick { clicks_left: u32 },
    Unfrozen,
    FlipBack { won: bool, duration_ms: u64 },
    Finished { outcome: SessionOutcome },
    PhaseChanged { phase: FlowPhase },
    BranchChanged { branch: Branch },
    ComboChanged { combo: f64 },
    ErrorTolerated { cell: Cell, errors: u32 },
    PatternRestarted,
    PatternCompleted { record: PatternRecord },
    Jackpot { bonus: u64 },
    TempoChanged { bpm: u32 },
}

/// Capability set shared by the legacy board and the Flow controller.
pub trait PatternSession: Send {
    fn mode(&self) -> GameMode;

    fn start(&mut self, now_ms: u64);

    /// Cells the player must reproduce, in order.
    fn pattern(&self) -> &[Cell];

    /// Whether the pattern is currently shown face up.
    fn pattern_visible(&self) -> bool;

    fn accepts_input(&self) -> bool;

    fn click(&mut self, cell: Cell, now_ms: u64) -> ClickOutcome;

    /// Fires every timer due at `now_ms`.
    fn advance(&mut self, now_ms: u64);

    /// Share of the current pattern already reproduced, in `[0, 1]`.
    fn progress(&self) -> f64;

    fn outcome(&self) -> Option<SessionOutcome>;

    fn drain_events(&mut self) -> Vec<SessionEvent>;

    /// Cancels every pending timer. Safe to call more than once.
    fn teardown(&mut self);
}

pub enum SessionConfig {
    SoloFloors(BoardSetup),
    Versus(BoardSetup),
    /// `Some(seed)` makes the pattern sequence reproducible.
    Flow { seed: Option<i64> },
}

pub fn create_session(config: SessionConfig) -> Box<dyn PatternSession> {
    match config {
        SessionConfig::SoloFloors(setup) => Box::new(LegacyBoard::new(BoardRole::Solo, setup)),
        SessionConfig::Versus(setup) => Box::new(LegacyBoard::new(BoardRole::Versus, setup)),
        SessionConfig::Flow { seed: Some(seed) } => {
            Box::new(FlowController::new(crate::pattern::PatternEngine::new(SeededRandom::new(seed))))
        }
        SessionConfig::Flow { seed: None } => {
            Box::new(FlowController::new(crate::pattern::PatternEngine::new(ThreadRandom)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{LEGACY_GRID, REVEAL_MS};
    use crate::path::generate_path;
    use crate::rng::Rng;

    fn setup() -> BoardSetup {
        let mut rng = Rng::new(21);
        BoardSetup::new(generate_path(&mut rng, LEGACY_GRID))
    }

    #[test]
    fn factory_selects_loop_by_mode() {
        let solo = create_session(SessionConfig::SoloFloors(setup()));
        assert_eq!(solo.mode(), GameMode::SoloFloors);
        let versus = create_session(SessionConfig::Versus(setup()));
        assert_eq!(versus.mode(), GameMode::Versus);
        let flow = create_session(SessionConfig::Flow { seed: Some(7) });
        assert_eq!(flow.mode(), GameMode::Flow);
    }

    #[test]
    fn both_loops_play_a_pattern_through_the_shared_trait() {
        let mut sessions = vec![
            create_session(SessionConfig::SoloFloors(setup())),
            create_session(SessionConfig::Flow { seed: Some(99) }),
        ];
        for session in sessions.iter_mut() {
            session.start(0);
            assert!(session.pattern_visible());
            assert!(!session.accepts_input());
            session.advance(REVEAL_MS);
            assert!(session.accepts_input(), "{:?}", session.mode());
            let cells: Vec<Cell> = session.pattern().to_vec();
            for cell in cells {
                session.click(cell, REVEAL_MS + 10);
            }
            assert_eq!(session.progress(), 1.0);
            assert!(!session.drain_events().is_empty());
            session.teardown();
        }
    }
}
