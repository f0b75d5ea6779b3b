//! SQLite achievement cache
//!
//! This module is split into submodules:
//! - `schema`: table/index definitions and known historical drift
//! - `migrations`: schema creation and reconciliation
//! - `backup`: pre-migration snapshots
//! - `metadata`: key/value bookkeeping
//! - `users`: current user per provider
//! - `games`: game identity lookups
//! - `progress`: per-user game summaries
//! - `achievements`: definitions and unlock rows
//! - `records`: reconstructing records for readers
//! - `export`: CSV dumps

pub mod backup;
pub mod export;
pub mod migrations;
pub mod schema;

mod achievements;
mod games;
mod metadata;
mod progress;
mod records;
mod users;

pub use achievements::SyncCounts;
pub use migrations::{MigrationReport, SchemaManager};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trophy_cache_core::{AchievementDetail, GameAchievementRecord, Provider, ValidationError};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::identity::{resolve_identity, IdentityResolver};
use progress::ProgressValues;
use users::CachedUser;

// rusqlite has no ToSql for u64
#[inline]
fn seconds_to_sql(seconds: u64) -> i64 {
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

#[inline]
fn seconds_from_sql(val: i64) -> u64 {
    val.max(0) as u64
}

/// Timestamps are stored as ISO-8601 UTC with millisecond precision
pub(crate) fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn from_db_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    // Older files stored "YYYY-MM-DD HH:MM:SS" without an offset
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn db_now() -> String {
    to_db_time(&Utc::now())
}

/// What one `save_record` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub user_id: i64,
    pub game_id: i64,
    pub progress_id: i64,
    pub game_written: bool,
    pub progress_written: bool,
    /// Conflicting progress rows removed while re-keying
    pub progress_removed: usize,
    pub definitions: SyncCounts,
    pub unlocks: SyncCounts,
}

impl SaveSummary {
    pub fn wrote_anything(&self) -> bool {
        self.game_written
            || self.progress_written
            || self.progress_removed > 0
            || self.definitions.wrote_anything()
            || self.unlocks.wrote_anything()
    }
}

struct StoreState {
    conn: Connection,
    current_users: HashMap<Provider, CachedUser>,
    migration: MigrationReport,
}

/// The open database, or why opening it failed. A failed open is never
/// retried by the same store.
#[derive(Default)]
struct StoreSlot {
    state: Option<StoreState>,
    open_error: Option<String>,
}

/// Relational achievement cache. Every public method is blocking and
/// serialized behind one lock; the database opens on first use.
pub struct CacheStore {
    config: CacheConfig,
    session: Option<Arc<dyn IdentityResolver>>,
    slot: Mutex<StoreSlot>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            session: None,
            slot: Mutex::new(StoreSlot::default()),
        }
    }

    /// Store that asks `session` for the acting user before saved settings
    pub fn with_session(config: CacheConfig, session: Arc<dyn IdentityResolver>) -> Self {
        Self {
            config,
            session: Some(session),
            slot: Mutex::new(StoreSlot::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Open the database and reconcile its schema, once per store. After a
    /// failed attempt every call reports that failure without touching the file.
    pub fn ensure_initialized(&self) -> Result<()> {
        self.with_state(|_| Ok(()))
    }

    /// Result of the schema pass run when the store opened
    pub fn migration_report(&self) -> Result<MigrationReport> {
        self.with_state(|state| Ok(state.migration.clone()))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut guard = self.slot.lock().map_err(|_| CacheError::Poisoned)?;
        let slot = &mut *guard;
        if let Some(reason) = &slot.open_error {
            return Err(CacheError::OpenFailed(reason.clone()));
        }
        let state = match slot.state.take() {
            Some(state) => state,
            None => match self.open() {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!("Failed to open achievement cache: {}", e);
                    slot.open_error = Some(e.to_string());
                    return Err(e);
                }
            },
        };
        f(slot.state.insert(state))
    }

    fn open(&self) -> Result<StoreState> {
        let db_path = self.config.db_path();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let migration = SchemaManager::new(&db_path, self.config.backup_root()).ensure_schema(&conn)?;
        tracing::info!(
            "Opened achievement cache {} (schema {} -> {}, {} corrections)",
            db_path.display(),
            migration.previous_version,
            migration.current_version,
            migration.applied.len()
        );

        Ok(StoreState {
            conn,
            current_users: HashMap::new(),
            migration,
        })
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        self.with_state(|state| Ok(metadata::get_metadata(&state.conn, key)?))
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ValidationError::EmptyMetadataKey.into());
        }
        self.with_state(|state| Ok(metadata::set_metadata(&state.conn, key, value)?))
    }

    pub fn has_any_current_user_rows(&self) -> Result<bool> {
        self.with_state(|state| Ok(records::has_any_current_user_rows(&state.conn)?))
    }

    pub fn list_cached_keys_for_current_users(&self) -> Result<HashSet<String>> {
        self.with_state(|state| Ok(records::list_cached_keys(&state.conn)?))
    }

    /// External id of the provider's current user, if any save ran for it
    pub fn current_user_id(&self, provider: Provider) -> Result<Option<String>> {
        self.with_state(|state| {
            Ok(users::current_user(&state.conn, provider)?.map(|user| user.external_user_id))
        })
    }

    pub fn load_record(&self, cache_key: &str) -> Result<Option<GameAchievementRecord>> {
        let cache_key = cache_key.trim();
        if cache_key.is_empty() {
            return Ok(None);
        }
        self.with_state(|state| Ok(records::load_record(&state.conn, cache_key)?))
    }

    pub fn load_all_records(&self) -> Result<HashMap<String, GameAchievementRecord>> {
        self.with_state(|state| Ok(records::load_all_records(&state.conn)?))
    }

    /// Persist `record` under `cache_key` for the acting user in one
    /// transaction, writing only rows whose values changed.
    pub fn save_record(&self, cache_key: &str, record: &GameAchievementRecord) -> Result<SaveSummary> {
        let cache_key = cache_key.trim();
        if cache_key.is_empty() {
            return Err(ValidationError::EmptyCacheKey.into());
        }
        let provider = record.provider();
        let identity = resolve_identity(self.session.as_deref(), &self.config, provider);
        let details = distinct_achievements(cache_key, record);

        self.with_state(|state| {
            let now = db_now();
            let tx = state.conn.transaction()?;

            let user = users::upsert_current_user(
                &tx,
                state.current_users.get(&provider),
                provider,
                &identity,
                &now,
            )?;
            let owner = games::GameOwner {
                user_id: user.user_id,
                cache_key,
            };
            let game = games::upsert_game(&tx, provider, record, owner, &now)?;
            let values = progress_values(game.id, cache_key, record);
            let progress = progress::upsert_progress(&tx, user.user_id, &values, &now)?;

            let (definition_ids, definitions) =
                achievements::sync_definitions(&tx, game.id, &details, &now)?;
            let desired: Vec<(i64, &AchievementDetail)> = details
                .iter()
                .filter_map(|detail| {
                    definition_ids
                        .get(&detail.api_name.trim().to_lowercase())
                        .map(|id| (*id, *detail))
                })
                .collect();
            let unlocks = achievements::sync_user_achievements(&tx, progress.id, &desired, &now)?;

            tx.commit()?;
            state.current_users.insert(provider, user.clone());

            let summary = SaveSummary {
                user_id: user.user_id,
                game_id: game.id,
                progress_id: progress.id,
                game_written: game.inserted || game.updated,
                progress_written: progress.inserted || progress.updated,
                progress_removed: progress.removed,
                definitions,
                unlocks,
            };
            tracing::debug!(
                "Saved {} ({}): {} unlocked of {}, wrote={}",
                cache_key,
                provider,
                values.unlocked_count,
                values.total_count,
                summary.wrote_anything()
            );
            Ok(summary)
        })
    }

    /// Drop every cached game. Users and metadata survive.
    pub fn clear_all(&self) -> Result<()> {
        self.with_state(|state| {
            let tx = state.conn.transaction()?;
            tx.execute_batch(
                "DELETE FROM UserAchievements;
                 DELETE FROM UserGameProgress;
                 DELETE FROM AchievementDefinitions;
                 DELETE FROM Games;",
            )?;
            tx.commit()?;

            if let Err(e) = state.conn.execute_batch("VACUUM") {
                tracing::warn!("VACUUM after clearing the cache failed: {}", e);
            }
            state.current_users.clear();
            tracing::info!("Cleared achievement cache");
            Ok(())
        })
    }

    /// Forget one library game. Returns the number of rows removed.
    pub fn remove_game(&self, external_library_id: &str) -> Result<usize> {
        let id = external_library_id.trim();
        if id.is_empty() {
            return Err(ValidationError::EmptyLibraryId.into());
        }
        self.with_state(|state| {
            let tx = state.conn.transaction()?;
            let removed = games::remove_game(&tx, id)?;
            tx.commit()?;
            tracing::info!("Removed {} cached rows for {}", removed, id);
            Ok(removed)
        })
    }

    /// Dump every table plus a summary as CSV files into `dir`
    pub fn export_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.with_state(|state| export::export_tables(&state.conn, dir))
    }
}

/// The record's distinct achievements; blank api names are logged
fn distinct_achievements<'a>(
    cache_key: &str,
    record: &'a GameAchievementRecord,
) -> Vec<&'a AchievementDetail> {
    let blank = record
        .achievements
        .iter()
        .filter(|a| a.api_name.trim().is_empty())
        .count();
    if blank > 0 {
        tracing::warn!("Skipping {} achievements without api name for {}", blank, cache_key);
    }
    record.distinct_achievements()
}

fn progress_values(game_id: i64, cache_key: &str, record: &GameAchievementRecord) -> ProgressValues {
    ProgressValues {
        game_id,
        cache_key: cache_key.to_string(),
        playtime_seconds: seconds_to_sql(record.playtime_seconds),
        has_achievements: record.has_achievements,
        excluded_by_user: record.excluded_by_user,
        unlocked_count: record.unlocked_count() as i64,
        total_count: record.total_count() as i64,
        provider_completed: record.provider_completed,
        is_completed: record.is_completed(),
        completion_marker: record.completion_marker_name().map(String::from),
        last_updated_utc: Some(to_db_time(&record.last_updated_utc)),
    }
}
