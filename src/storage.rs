use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::champion::{ChampionState, DEFAULT_CHAMPION_ID};
use crate::error::StorageError;
use crate::types::Resources;

pub const PROFILE_FILE: &str = "memostep.json";
const STORE_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CurrentDaily {
    pub attempts_before_win: Option<u32>,
    pub time_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyRecord {
    pub total_wins: u32,
    pub streak: u32,
    pub best_time_ms: Option<u64>,
    pub last_win_date: Option<NaiveDate>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyWinSummary {
    pub attempts_before_win: u32,
    pub time_ms: u64,
    pub total_wins: u32,
    pub streak: u32,
    pub best_time_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedAvatar {
    pub id: String,
    #[serde(default)]
    pub img: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredChampion {
    xp: u64,
    level: u32,
    is_unlocked: bool,
}

/// Everything the device remembers between sessions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalProfile {
    pub player_id: Option<Uuid>,
    pub username: Option<String>,
    pub audio_muted: bool,
    pub resources: Resources,
    pub total_xp: u64,
    pub selected_avatar: Option<SelectedAvatar>,
    champions: BTreeMap<String, StoredChampion>,
    pub current_day: Option<NaiveDate>,
    pub current_daily: CurrentDaily,
    pub daily_stats: DailyRecord,
    pub solo_best_level: u32,
    pub solo_best_time_ms: Option<u64>,
    pub migrated: bool,
    #[serde(rename = "_v")]
    pub version: u8,
}

impl Default for LocalProfile {
    fn default() -> Self {
        Self {
            player_id: None,
            username: None,
            audio_muted: false,
            resources: Resources::default(),
            total_xp: 0,
            selected_avatar: None,
            champions: BTreeMap::new(),
            current_day: None,
            current_daily: CurrentDaily::default(),
            daily_stats: DailyRecord::default(),
            solo_best_level: 0,
            solo_best_time_ms: None,
            migrated: false,
            version: STORE_VERSION,
        }
    }
}

impl LocalProfile {
    pub fn champion(&self, id: &str) -> ChampionState {
        match self.champions.get(id) {
            Some(stored) => ChampionState {
                id: id.to_string(),
                xp: stored.xp,
                level: stored.level,
                is_unlocked: stored.is_unlocked,
            },
            None if id == DEFAULT_CHAMPION_ID => ChampionState::starter(),
            None => ChampionState::new(id),
        }
    }
}

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// JSON-file backed local profile. Writes are best effort and logged.
pub struct LocalStore {
    file_path: PathBuf,
    profile: LocalProfile,
}

impl LocalStore {
    pub fn open(file_path: PathBuf) -> Self {
        let profile = load_profile(&file_path);
        Self { file_path, profile }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::open(dir.join(PROFILE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn profile(&self) -> &LocalProfile {
        &self.profile
    }

    pub fn ensure_player_id(&mut self) -> Uuid {
        if let Some(id) = self.profile.player_id {
            return id;
        }
        let id = Uuid::new_v4();
        self.profile.player_id = Some(id);
        self.persist();
        id
    }

    pub fn set_player_id(&mut self, id: Uuid) {
        self.profile.player_id = Some(id);
        self.persist();
    }

    pub fn set_username(&mut self, name: &str) {
        self.profile.username = Some(name.trim().to_string());
        self.persist();
    }

    pub fn set_audio_muted(&mut self, muted: bool) {
        self.profile.audio_muted = muted;
        self.persist();
    }

    pub fn add_resources(&mut self, gained: Resources) -> Resources {
        self.profile.resources.merge(gained);
        self.persist();
        self.profile.resources
    }

    pub fn add_xp(&mut self, amount: u64) -> u64 {
        self.profile.total_xp = self.profile.total_xp.saturating_add(amount);
        self.persist();
        self.profile.total_xp
    }

    pub fn save_champion(&mut self, champion: &ChampionState) {
        self.profile.champions.insert(
            champion.id.clone(),
            StoredChampion {
                xp: champion.xp,
                level: champion.level,
                is_unlocked: champion.is_unlocked,
            },
        );
        self.persist();
    }

    pub fn set_selected_avatar(&mut self, avatar: SelectedAvatar) {
        self.profile.selected_avatar = Some(avatar);
        self.persist();
    }

    pub fn record_solo_best(&mut self, level: u32, time_ms: u64) {
        let profile = &mut self.profile;
        if level > profile.solo_best_level {
            profile.solo_best_level = level;
            profile.solo_best_time_ms = Some(time_ms);
        } else if level == profile.solo_best_level {
            profile.solo_best_time_ms = Some(profile.solo_best_time_ms.map_or(time_ms, |best| best.min(time_ms)));
        }
        self.persist();
    }

    pub fn mark_migrated(&mut self) {
        self.profile.migrated = true;
        self.persist();
    }

    /// Switching day resets the in-progress daily attempt.
    pub fn set_current_day(&mut self, day: NaiveDate) {
        self.roll_day(day);
        self.persist();
    }

    fn roll_day(&mut self, day: NaiveDate) {
        if self.profile.current_day != Some(day) {
            self.profile.current_day = Some(day);
            self.profile.current_daily = CurrentDaily::default();
        }
    }

    pub fn is_daily_done(&self, day: NaiveDate) -> bool {
        self.profile.daily_stats.last_win_date == Some(day)
    }

    /// Counts a failed attempt; returns the attempts so far today.
    pub fn mark_daily_attempt(&mut self, day: NaiveDate) -> u32 {
        self.roll_day(day);
        let attempts = self.profile.current_daily.attempts_before_win.unwrap_or(0) + 1;
        self.profile.current_daily.attempts_before_win = Some(attempts);
        self.persist();
        attempts
    }

    /// The winning attempt counts too. Streaks grow on consecutive days and a
    /// second win on the same day leaves the streak alone.
    pub fn record_daily_win(&mut self, day: NaiveDate, time_ms: u64) -> DailyWinSummary {
        self.roll_day(day);
        let attempts = self.profile.current_daily.attempts_before_win.unwrap_or(0) + 1;
        self.profile.current_daily = CurrentDaily {
            attempts_before_win: Some(attempts),
            time_ms: Some(time_ms),
        };

        let stats = &mut self.profile.daily_stats;
        stats.total_wins += 1;
        match stats.last_win_date {
            Some(last) if last.succ_opt() == Some(day) => stats.streak += 1,
            Some(last) if last == day => {}
            _ => stats.streak = 1,
        }
        stats.best_time_ms = Some(stats.best_time_ms.map_or(time_ms, |best| best.min(time_ms)));
        stats.last_win_date = Some(day);

        let summary = DailyWinSummary {
            attempts_before_win: attempts,
            time_ms,
            total_wins: stats.total_wins,
            streak: stats.streak,
            best_time_ms: stats.best_time_ms,
        };
        self.persist();
        summary
    }

    pub fn save(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.profile)?;
        fs::write(&self.file_path, text)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(error) = self.save() {
            tracing::error!(path = %self.file_path.display(), %error, "[storage] failed to write profile");
        }
    }
}

fn load_profile(path: &Path) -> LocalProfile {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), %error, "[storage] failed to read profile");
            }
            return LocalProfile::default();
        }
    };
    let raw = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "[storage] profile is not an object");
            return LocalProfile::default();
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "[storage] failed to parse profile");
            return LocalProfile::default();
        }
    };

    match raw.get("_v").and_then(Value::as_u64) {
        Some(version) if version > u64::from(STORE_VERSION) => {
            tracing::warn!(path = %path.display(), version, "[storage] unsupported profile version");
            return LocalProfile::default();
        }
        _ => {}
    }

    repair_profile(raw, path)
}

/// Keeps every field that parses and falls back to defaults for the rest.
fn repair_profile(mut raw: Map<String, Value>, path: &Path) -> LocalProfile {
    if let Some(Value::Object(champions)) = raw.remove("champions") {
        let valid: Map<String, Value> = champions
            .into_iter()
            .filter(|(id, value)| {
                let ok = serde_json::from_value::<StoredChampion>(value.clone()).is_ok();
                if !ok {
                    tracing::warn!(path = %path.display(), champion = %id, "[storage] dropping invalid champion entry");
                }
                ok
            })
            .collect();
        raw.insert("champions".to_string(), Value::Object(valid));
    }

    if let Ok(profile) = serde_json::from_value::<LocalProfile>(Value::Object(raw.clone())) {
        return profile;
    }

    let mut merged = match serde_json::to_value(LocalProfile::default()) {
        Ok(Value::Object(map)) => map,
        _ => return LocalProfile::default(),
    };
    for (key, value) in raw {
        let previous = merged.insert(key.clone(), value);
        if serde_json::from_value::<LocalProfile>(Value::Object(merged.clone())).is_err() {
            tracing::warn!(path = %path.display(), field = %key, "[storage] dropping invalid field");
            match previous {
                Some(previous) => merged.insert(key, previous),
                None => merged.remove(&key),
            };
        }
    }
    serde_json::from_value(Value::Object(merged)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        let unique = format!("{}-{}-{}", name, std::process::id(), rand::random::<u32>());
        std::env::temp_dir().join(unique).join(PROFILE_FILE)
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn cleanup(path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn missing_file_gives_defaults_and_player_id_persists() {
        let path = temp_file("storage-defaults");
        let mut store = LocalStore::open(path.clone());
        assert_eq!(store.profile(), &LocalProfile::default());
        let id = store.ensure_player_id();
        assert_eq!(store.ensure_player_id(), id);
        assert_eq!(id.get_version_num(), 4);

        let reopened = LocalStore::open(path.clone());
        assert_eq!(reopened.profile().player_id, Some(id));
        cleanup(&path);
    }

    #[test]
    fn corrupted_file_reads_as_defaults() {
        let path = temp_file("storage-corrupt");
        fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        fs::write(&path, "{ not json").expect("write");
        let store = LocalStore::open(path.clone());
        assert_eq!(store.profile(), &LocalProfile::default());
        cleanup(&path);
    }

    #[test]
    fn invalid_fields_are_repaired_and_valid_ones_kept() {
        let path = temp_file("storage-repair");
        fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        let raw = r#"{
  "audioMuted": true,
  "totalXp": "lots",
  "resources": { "gold": 40, "essence": 2 },
  "champions": {
    "mage_lumineux": { "xp": 12, "level": 2, "isUnlocked": true },
    "broken": { "xp": -3 }
  },
  "dailyStats": { "totalWins": 2, "streak": 1, "lastWinDate": "2025-03-01" },
  "_v": 1
}"#;
        fs::write(&path, raw).expect("write");

        let store = LocalStore::open(path.clone());
        let profile = store.profile();
        assert!(profile.audio_muted);
        assert_eq!(profile.total_xp, 0);
        assert_eq!(profile.resources.gold, 40);
        assert_eq!(profile.resources.gems, 0);
        assert_eq!(profile.champion("mage_lumineux").level, 2);
        assert_eq!(profile.champion("broken"), ChampionState::new("broken"));
        assert_eq!(profile.daily_stats.last_win_date, Some(day(2025, 3, 1)));
        cleanup(&path);
    }

    #[test]
    fn newer_version_is_not_trusted() {
        let path = temp_file("storage-version");
        fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        fs::write(&path, r#"{ "audioMuted": true, "_v": 9 }"#).expect("write");
        let store = LocalStore::open(path.clone());
        assert!(!store.profile().audio_muted);
        cleanup(&path);
    }

    #[test]
    fn daily_streak_counts_consecutive_days_once() {
        let path = temp_file("storage-daily");
        let mut store = LocalStore::open(path.clone());
        assert_eq!(store.mark_daily_attempt(day(2025, 3, 1)), 1);
        let first = store.record_daily_win(day(2025, 3, 1), 42_000);
        assert_eq!(first.attempts_before_win, 2);
        assert_eq!(first.streak, 1);
        assert!(store.is_daily_done(day(2025, 3, 1)));

        let again = store.record_daily_win(day(2025, 3, 1), 40_000);
        assert_eq!(again.streak, 1);
        assert_eq!(again.best_time_ms, Some(40_000));

        let next = store.record_daily_win(day(2025, 3, 2), 50_000);
        assert_eq!(next.attempts_before_win, 1);
        assert_eq!(next.streak, 2);
        assert_eq!(next.best_time_ms, Some(40_000));

        let gap = store.record_daily_win(day(2025, 3, 5), 45_000);
        assert_eq!(gap.streak, 1);
        assert_eq!(gap.total_wins, 4);

        let reopened = LocalStore::open(path.clone());
        assert_eq!(reopened.profile().daily_stats.streak, 1);
        assert_eq!(reopened.profile().current_day, Some(day(2025, 3, 5)));
        cleanup(&path);
    }

    #[test]
    fn champions_and_totals_roundtrip_through_disk() {
        let path = temp_file("storage-champions");
        let mut store = LocalStore::open(path.clone());
        assert!(store.profile().champion(DEFAULT_CHAMPION_ID).is_unlocked);

        let mut champion = store.profile().champion(DEFAULT_CHAMPION_ID);
        champion.add_xp(25);
        store.save_champion(&champion);
        store.add_xp(120);
        store.add_resources(Resources { gold: 10, essence: 1, gems: 0 });
        store.record_solo_best(4, 30_000);
        store.record_solo_best(4, 25_000);
        store.record_solo_best(3, 1_000);

        let reopened = LocalStore::open(path.clone());
        let profile = reopened.profile();
        assert_eq!(profile.champion(DEFAULT_CHAMPION_ID).xp, 25);
        assert_eq!(profile.total_xp, 120);
        assert_eq!(profile.resources.gold, 10);
        assert_eq!(profile.solo_best_level, 4);
        assert_eq!(profile.solo_best_time_ms, Some(25_000));
        cleanup(&path);
    }
}
