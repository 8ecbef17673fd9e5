//! Account profiles and the one-time guest migration.

use std::collections::HashMap;
use std::future::Future;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ProfileError, StoreError};
use crate::storage::LocalStore;
use crate::types::Resources;
use crate::xp::XpTable;

const GUEST_PREFIX: &str = "Memoguest";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_guest: bool,
    pub updated_at: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub player_id: String,
    pub total_xp: u64,
    pub current_level: u32,
    pub gold: u64,
    pub essence: u64,
    pub gems: u64,
    pub solo_best_level: u32,
    pub solo_best_time_ms: Option<u64>,
    pub selected_avatar: Option<String>,
}

impl PlayerStats {
    pub fn new(player_id: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            current_level: 1,
            ..Self::default()
        }
    }
}

/// Partial update of a stats row; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsPatch {
    pub total_xp: Option<u64>,
    pub current_level: Option<u32>,
    pub resources: Option<Resources>,
    pub solo_best: Option<(u32, Option<u64>)>,
    pub selected_avatar: Option<String>,
}

impl StatsPatch {
    fn apply(&self, stats: &mut PlayerStats) {
        if let Some(total_xp) = self.total_xp {
            stats.total_xp = total_xp;
        }
        if let Some(level) = self.current_level {
            stats.current_level = level;
        }
        if let Some(resources) = self.resources {
            stats.gold = resources.gold;
            stats.essence = resources.essence;
            stats.gems = resources.gems;
        }
        if let Some((level, time_ms)) = self.solo_best {
            stats.solo_best_level = level;
            stats.solo_best_time_ms = time_ms;
        }
        if let Some(avatar) = &self.selected_avatar {
            stats.selected_avatar = Some(avatar.clone());
        }
    }
}

/// The `profiles` and `player_stats` tables.
pub trait ProfileStore: Send + Sync + 'static {
    /// Inserts or replaces the profile and makes sure a stats row exists.
    fn upsert_profile(&self, profile: Profile)
        -> impl Future<Output = Result<Profile, StoreError>> + Send;

    fn profile(&self, user_id: &str) -> impl Future<Output = Result<Profile, StoreError>> + Send;

    fn player_stats(&self, user_id: &str)
        -> impl Future<Output = Result<PlayerStats, StoreError>> + Send;

    fn update_player_stats(
        &self,
        user_id: &str,
        patch: StatsPatch,
    ) -> impl Future<Output = Result<PlayerStats, StoreError>> + Send;
}

#[derive(Default)]
struct ProfileTables {
    profiles: HashMap<String, Profile>,
    stats: HashMap<String, PlayerStats>,
}

#[derive(Default)]
pub struct MemoryProfileStore {
    tables: Mutex<ProfileTables>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for MemoryProfileStore {
    async fn upsert_profile(&self, profile: Profile) -> Result<Profile, StoreError> {
        let mut tables = self.tables.lock().await;
        tables
            .stats
            .entry(profile.id.clone())
            .or_insert_with(|| PlayerStats::new(&profile.id));
        tables.profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }

    async fn profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))
    }

    async fn player_stats(&self, user_id: &str) -> Result<PlayerStats, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .stats
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))
    }

    async fn update_player_stats(
        &self,
        user_id: &str,
        patch: StatsPatch,
    ) -> Result<PlayerStats, StoreError> {
        let mut tables = self.tables.lock().await;
        let stats = tables
            .stats
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        patch.apply(stats);
        Ok(stats.clone())
    }
}

/// Placeholder names handed to guests look like `Memoguest1234`.
pub fn is_guest_name(name: &str) -> bool {
    name.trim()
        .strip_prefix(GUEST_PREFIX)
        .is_some_and(|digits| digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Signed-in account the guest data moves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountUser {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated,
    AlreadyMigrated,
}

/// Copies the guest's local totals to the account once. The local `migrated`
/// flag is set only after every write succeeded, so a failed run can retry.
pub async fn migrate_guest_data<P: ProfileStore>(
    store: &P,
    local: &mut LocalStore,
    user: &AccountUser,
    xp_table: &XpTable,
) -> Result<MigrationOutcome, ProfileError> {
    if local.profile().migrated {
        tracing::debug!(user = %user.id, "[profile] guest data already migrated");
        return Ok(MigrationOutcome::AlreadyMigrated);
    }
    let guest = local.profile().clone();

    let username = guest
        .username
        .clone()
        .filter(|name| !name.is_empty() && !is_guest_name(name))
        .unwrap_or_else(|| user.id.clone());
    let display_name = user.display_name.clone().unwrap_or_else(|| username.clone());
    store
        .upsert_profile(Profile {
            id: user.id.clone(),
            username,
            display_name,
            avatar_url: guest.selected_avatar.as_ref().and_then(|avatar| avatar.img.clone()),
            is_guest: false,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
        .await?;

    let mut patch = StatsPatch::default();
    if guest.total_xp > 0 {
        patch.total_xp = Some(guest.total_xp);
        patch.current_level = Some(xp_table.calculate_level(guest.total_xp).level);
    }
    if guest.resources != Resources::default() {
        patch.resources = Some(guest.resources);
    }
    if guest.solo_best_level > 0 {
        patch.solo_best = Some((guest.solo_best_level, guest.solo_best_time_ms));
    }
    patch.selected_avatar = guest.selected_avatar.map(|avatar| avatar.id);
    if patch != StatsPatch::default() {
        store.update_player_stats(&user.id, patch).await?;
    }

    local.mark_migrated();
    tracing::info!(user = %user.id, xp = guest.total_xp, "[profile] guest data migrated");
    Ok(MigrationOutcome::Migrated)
}
