use serde::{Deserialize, Serialize};

use crate::rng::RandomSource;
use crate::types::Resources;

pub const MAX_CHAMPION_LEVEL: u32 = 10;
pub const DEFAULT_CHAMPION_ID: &str = "mage_lumineux";

/// Champion XP awarded per gameplay event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChampionEvent {
    FinishStage,
    FinishWithThreeHearts,
    PerfectStage,
    MultiplayerWin,
}

impl ChampionEvent {
    pub fn xp(self) -> u64 {
        match self {
            ChampionEvent::FinishStage => 1,
            ChampionEvent::FinishWithThreeHearts => 2,
            ChampionEvent::PerfectStage => 3,
            ChampionEvent::MultiplayerWin => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChampionLevel {
    pub level: u32,
    pub xp_required: u64,
    pub gold_required: u64,
    pub essence_required: u64,
    /// Solo: lives absorbed per activation.
    pub shield: u32,
    /// Versus: stun length in seconds.
    pub stun_duration: f64,
    /// Passive: extra chance for a bonus riding on a path cell.
    pub bonus_on_path_chance: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChampionDef {
    pub id: String,
    pub name: String,
    pub levels: Vec<ChampionLevel>,
}

impl Default for ChampionDef {
    fn default() -> Self {
        Self {
            id: DEFAULT_CHAMPION_ID.to_string(),
            name: "Mage Lumineux".to_string(),
            levels: (1..=MAX_CHAMPION_LEVEL)
                .map(|level| {
                    let step = u64::from(level - 1);
                    ChampionLevel {
                        level,
                        xp_required: 10 * step,
                        gold_required: 50 * step,
                        essence_required: step,
                        shield: 1 + (level - 1) / 4,
                        stun_duration: 1.0 + 0.1 * f64::from(level - 1),
                        bonus_on_path_chance: 0.01 * f64::from(level),
                    }
                })
                .collect(),
        }
    }
}

impl ChampionDef {
    pub fn level(&self, level: u32) -> Option<&ChampionLevel> {
        self.levels.iter().find(|l| l.level == level)
    }

    /// Requirements to climb from `current` to the next level.
    pub fn evolution_requirements(&self, current: u32) -> Option<&ChampionLevel> {
        if current >= MAX_CHAMPION_LEVEL {
            return None;
        }
        self.level(current + 1)
    }
}

/// Per-player champion progress, persisted in the local profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChampionState {
    pub id: String,
    pub xp: u64,
    pub level: u32,
    pub is_unlocked: bool,
}

impl ChampionState {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            xp: 0,
            level: 1,
            is_unlocked: false,
        }
    }

    pub fn starter() -> Self {
        Self {
            is_unlocked: true,
            ..Self::new(DEFAULT_CHAMPION_ID)
        }
    }

    pub fn add_xp(&mut self, amount: u64) {
        self.xp += amount;
    }

    pub fn award(&mut self, event: ChampionEvent) {
        self.add_xp(event.xp());
    }

    pub fn can_evolve(&self, def: &ChampionDef, wallet: &Resources) -> bool {
        match def.evolution_requirements(self.level) {
            Some(req) => {
                self.xp >= req.xp_required
                    && wallet.gold >= req.gold_required
                    && wallet.essence >= req.essence_required
            }
            None => false,
        }
    }

    /// Spends XP and resources to climb one level. Returns the resources spent.
    pub fn evolve(&mut self, def: &ChampionDef, wallet: &mut Resources) -> Option<Resources> {
        if !self.can_evolve(def, wallet) {
            return None;
        }
        let req = def.evolution_requirements(self.level)?;
        let cost = Resources {
            gold: req.gold_required,
            essence: req.essence_required,
            gems: 0,
        };
        self.xp -= req.xp_required;
        self.level += 1;
        wallet.gold -= cost.gold;
        wallet.essence -= cost.essence;
        tracing::info!(champion = %self.id, level = self.level, "[champion] evolved");
        Some(cost)
    }

    pub fn level_progress(&self, def: &ChampionDef) -> f64 {
        match def.evolution_requirements(self.level) {
            Some(req) if req.xp_required > 0 => (self.xp as f64 / req.xp_required as f64).min(1.0),
            _ => 1.0,
        }
    }

    /// Passive modifier fed to the grid enricher.
    pub fn bonus_chance_modifier(&self, def: &ChampionDef) -> f64 {
        if !self.is_unlocked || def.id != self.id {
            return 0.0;
        }
        def.level(self.level)
            .map(|l| l.bonus_on_path_chance)
            .unwrap_or(0.0)
    }

    pub fn roll_passive(&self, def: &ChampionDef, rng: &mut impl RandomSource) -> bool {
        rng.bool(self.bonus_chance_modifier(def))
    }

    pub fn activate_shield(&self, def: &ChampionDef) -> Option<u32> {
        def.level(self.level).map(|l| l.shield.max(1))
    }

    pub fn stun_duration_ms(&self, def: &ChampionDef) -> Option<u64> {
        def.level(self.level)
            .map(|l| (l.stun_duration * 1_000.0).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Rng;

    #[test]
    fn event_xp_matches_rules() {
        let mut champ = ChampionState::starter();
        champ.award(ChampionEvent::FinishStage);
        champ.award(ChampionEvent::FinishWithThreeHearts);
        champ.award(ChampionEvent::PerfectStage);
        champ.award(ChampionEvent::MultiplayerWin);
        assert_eq!(champ.xp, 11);
    }

    #[test]
    fn evolve_spends_xp_and_resources() {
        let def = ChampionDef::default();
        let mut champ = ChampionState::starter();
        let mut wallet = Resources {
            gold: 60,
            essence: 2,
            gems: 0,
        };
        assert!(!champ.can_evolve(&def, &wallet));
        champ.add_xp(15);
        assert!((champ.level_progress(&def) - 1.0).abs() < 1e-9);
        let cost = champ.evolve(&def, &mut wallet).expect("evolves");
        assert_eq!(cost.gold, 50);
        assert_eq!(champ.level, 2);
        assert_eq!(champ.xp, 5);
        assert_eq!(wallet.gold, 10);
        assert_eq!(wallet.essence, 1);
        assert!(champ.evolve(&def, &mut wallet).is_none());
    }

    #[test]
    fn max_level_cannot_evolve() {
        let def = ChampionDef::default();
        let mut champ = ChampionState::starter();
        champ.level = MAX_CHAMPION_LEVEL;
        champ.xp = 10_000;
        let mut wallet = Resources {
            gold: 10_000,
            essence: 10_000,
            gems: 0,
        };
        assert!(champ.evolve(&def, &mut wallet).is_none());
        assert_eq!(champ.level_progress(&def), 1.0);
    }

    #[test]
    fn passive_modifier_requires_unlocked_champion() {
        let def = ChampionDef::default();
        let locked = ChampionState::new(DEFAULT_CHAMPION_ID);
        assert_eq!(locked.bonus_chance_modifier(&def), 0.0);
        let mut starter = ChampionState::starter();
        starter.level = 3;
        assert!((starter.bonus_chance_modifier(&def) - 0.03).abs() < 1e-12);

        let mut rng = Rng::new(4);
        let hits = (0..10_000).filter(|_| starter.roll_passive(&def, &mut rng)).count();
        assert!(hits > 150 && hits < 450, "hits {hits}");
    }

    #[test]
    fn abilities_scale_with_level() {
        let def = ChampionDef::default();
        let mut champ = ChampionState::starter();
        assert_eq!(champ.activate_shield(&def), Some(1));
        assert_eq!(champ.stun_duration_ms(&def), Some(1_000));
        champ.level = 5;
        assert_eq!(champ.activate_shield(&def), Some(2));
        assert_eq!(champ.stun_duration_ms(&def), Some(1_400));
    }
}
