use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const MAX_PLAYER_LEVEL: u32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchEvent {
    Win,
    Lose,
    PerfectRun,
    TimeRecord,
    AllBonusCollected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiplayerEvent {
    DuelWin,
    #[serde(rename = "top3_battle_royale")]
    Top3BattleRoyale,
    BattleRoyaleWin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoloEnd {
    Abandon,
    NoLifeLeft,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum LevelReward {
    Gold(u64),
    Gems(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelData {
    pub level: u32,
    pub xp_required: u64,
    #[serde(default)]
    pub reward: Option<LevelReward>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoloXpRules {
    pub xp_per_stage: u64,
    pub xp_per_second: f64,
    pub end_multiplier: BTreeMap<SoloEnd, f64>,
}

/// XP rules and the level curve. `levels[i]` holds the XP needed to climb
/// from level `i` to level `i + 1`; level 1 needs nothing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XpTable {
    pub match_xp: BTreeMap<MatchEvent, u64>,
    pub multiplayer_xp: BTreeMap<MultiplayerEvent, u64>,
    pub solo: SoloXpRules,
    pub levels: Vec<LevelData>,
}

impl Default for XpTable {
    fn default() -> Self {
        let levels = (1..=MAX_PLAYER_LEVEL)
            .map(|level| LevelData {
                level,
                xp_required: if level == 1 { 0 } else { 100 + 25 * (level as u64 - 2) },
                reward: default_reward(level),
            })
            .collect();
        Self {
            match_xp: BTreeMap::from([
                (MatchEvent::Win, 50),
                (MatchEvent::Lose, 10),
                (MatchEvent::PerfectRun, 30),
                (MatchEvent::TimeRecord, 20),
                (MatchEvent::AllBonusCollected, 15),
            ]),
            multiplayer_xp: BTreeMap::from([
                (MultiplayerEvent::DuelWin, 80),
                (MultiplayerEvent::Top3BattleRoyale, 40),
                (MultiplayerEvent::BattleRoyaleWin, 150),
            ]),
            solo: SoloXpRules {
                xp_per_stage: 10,
                xp_per_second: 0.5,
                end_multiplier: BTreeMap::from([
                    (SoloEnd::Abandon, 0.5),
                    (SoloEnd::NoLifeLeft, 0.8),
                    (SoloEnd::Completed, 1.0),
                ]),
            },
            levels,
        }
    }
}

fn default_reward(level: u32) -> Option<LevelReward> {
    if level % 10 == 0 {
        Some(LevelReward::Gems(u64::from(level / 10)))
    } else if level % 5 == 0 {
        Some(LevelReward::Gold(u64::from(level) * 10))
    } else {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelInfo {
    pub level: u32,
    pub current_level_xp: u64,
    pub xp_for_next_level: u64,
    pub progress: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XpGain {
    pub new_total_xp: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub leveled_up: bool,
    pub rewards: Vec<(u32, LevelReward)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoloXp {
    pub base_xp: u64,
    pub time_xp: u64,
    pub multiplier: f64,
    pub total_xp: u64,
}

impl XpTable {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn match_xp(&self, event: MatchEvent) -> u64 {
        self.match_xp.get(&event).copied().unwrap_or(0)
    }

    pub fn multiplayer_xp(&self, event: MultiplayerEvent) -> u64 {
        self.multiplayer_xp.get(&event).copied().unwrap_or(0)
    }

    pub fn level_data(&self, level: u32) -> Option<&LevelData> {
        self.levels.iter().find(|data| data.level == level)
    }

    pub fn calculate_level(&self, total_xp: u64) -> LevelInfo {
        let mut level = 1;
        let mut used = 0u64;
        for data in &self.levels {
            if total_xp >= used + data.xp_required {
                used += data.xp_required;
                level = data.level;
            } else {
                break;
            }
        }

        let current_level_xp = total_xp - used;
        let xp_for_next_level = self
            .level_data(level + 1)
            .map(|data| data.xp_required)
            .unwrap_or(0);
        let progress = if xp_for_next_level > 0 {
            current_level_xp as f64 / xp_for_next_level as f64
        } else {
            1.0
        };

        LevelInfo {
            level,
            current_level_xp,
            xp_for_next_level,
            progress: progress.clamp(0.0, 1.0),
        }
    }

    pub fn add_xp(&self, current_total: u64, amount: u64) -> XpGain {
        let old_level = self.calculate_level(current_total).level;
        let new_total_xp = current_total + amount;
        let new_level = self.calculate_level(new_total_xp).level;
        let rewards = (old_level + 1..=new_level)
            .filter_map(|level| {
                self.level_data(level)
                    .and_then(|data| data.reward)
                    .map(|reward| (level, reward))
            })
            .collect();
        XpGain {
            new_total_xp,
            old_level,
            new_level,
            leveled_up: new_level > old_level,
            rewards,
        }
    }

    /// `stage * xp_per_stage + floor(seconds * xp_per_second)`, scaled by how the
    /// run ended and floored.
    pub fn solo_xp(&self, stage: u32, time_seconds: f64, end: SoloEnd) -> SoloXp {
        let base_xp = u64::from(stage) * self.solo.xp_per_stage;
        let time_xp = (time_seconds.max(0.0) * self.solo.xp_per_second).floor() as u64;
        let multiplier = self.solo.end_multiplier.get(&end).copied().unwrap_or(1.0);
        let total_xp = ((base_xp + time_xp) as f64 * multiplier).floor() as u64;
        SoloXp {
            base_xp,
            time_xp,
            multiplier,
            total_xp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_curve_thresholds() {
        let table = XpTable::default();
        assert_eq!(table.calculate_level(0).level, 1);
        assert_eq!(table.calculate_level(99).level, 1);
        let two = table.calculate_level(100);
        assert_eq!(two.level, 2);
        assert_eq!(two.current_level_xp, 0);
        assert_eq!(two.xp_for_next_level, 125);
        assert_eq!(table.calculate_level(225).level, 3);
        let half = table.calculate_level(100 + 62);
        assert!((half.progress - 62.0 / 125.0).abs() < 1e-9);
    }

    #[test]
    fn max_level_reports_full_progress() {
        let table = XpTable::default();
        let total: u64 = table.levels.iter().map(|l| l.xp_required).sum();
        let info = table.calculate_level(total + 10_000);
        assert_eq!(info.level, MAX_PLAYER_LEVEL);
        assert_eq!(info.xp_for_next_level, 0);
        assert_eq!(info.progress, 1.0);
    }

    #[test]
    fn add_xp_round_trips_through_calculate_level() {
        let table = XpTable::default();
        let mut total = 0u64;
        let mut level = 1;
        for step in 0..400u64 {
            let amount = (step * 37) % 180;
            let gain = table.add_xp(total, amount);
            assert_eq!(gain.new_total_xp, total + amount);
            assert_eq!(gain.old_level, level);
            assert!(gain.new_level >= gain.old_level);
            assert_eq!(table.calculate_level(gain.new_total_xp).level, gain.new_level);
            assert_eq!(gain.leveled_up, gain.new_level > gain.old_level);
            total = gain.new_total_xp;
            level = gain.new_level;
        }
    }

    #[test]
    fn crossing_reward_levels_collects_each_reward() {
        let table = XpTable::default();
        let to_level_ten: u64 = table.levels.iter().take(10).map(|l| l.xp_required).sum();
        let gain = table.add_xp(0, to_level_ten);
        assert_eq!(gain.new_level, 10);
        assert_eq!(
            gain.rewards,
            vec![(5, LevelReward::Gold(50)), (10, LevelReward::Gems(1))]
        );
    }

    #[test]
    fn solo_xp_scales_by_end_type() {
        let table = XpTable::default();
        let done = table.solo_xp(4, 61.0, SoloEnd::Completed);
        assert_eq!(done.base_xp, 40);
        assert_eq!(done.time_xp, 30);
        assert_eq!(done.total_xp, 70);
        assert_eq!(table.solo_xp(4, 61.0, SoloEnd::Abandon).total_xp, 35);
        assert_eq!(table.solo_xp(4, 61.0, SoloEnd::NoLifeLeft).total_xp, 56);
    }

    #[test]
    fn event_tables_and_json_override() {
        let table = XpTable::default();
        assert_eq!(table.match_xp(MatchEvent::Win), 50);
        assert_eq!(table.multiplayer_xp(MultiplayerEvent::BattleRoyaleWin), 150);

        let custom = XpTable::from_json(r#"{"match_xp":{"win":7}}"#).expect("parse");
        assert_eq!(custom.match_xp(MatchEvent::Win), 7);
        assert_eq!(custom.match_xp(MatchEvent::Lose), 0);
        assert_eq!(custom.levels.len(), MAX_PLAYER_LEVEL as usize);
    }
}
