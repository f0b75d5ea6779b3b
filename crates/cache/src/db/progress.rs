//! Per-user game progress rows

use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use trophy_cache_core::decisions::should_use_fallback_lookup;

const PROGRESS_COLUMNS: &str = "Id, GameId, CacheKey, PlaytimeSeconds, HasAchievements, \
     ExcludedByUser, UnlockedCount, TotalCount, ProviderCompleted, IsCompleted, \
     CompletionMarkerApiName, LastUpdatedUtc";

/// Summary values written to a UserGameProgress row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressValues {
    pub game_id: i64,
    pub cache_key: String,
    pub playtime_seconds: i64,
    pub has_achievements: bool,
    pub excluded_by_user: bool,
    pub unlocked_count: i64,
    pub total_count: i64,
    pub provider_completed: bool,
    pub is_completed: bool,
    pub completion_marker: Option<String>,
    pub last_updated_utc: Option<String>,
}

#[derive(Debug, Clone)]
struct ProgressRow {
    id: i64,
    values: ProgressValues,
}

impl ProgressRow {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            values: ProgressValues {
                game_id: row.get(1)?,
                cache_key: row.get(2)?,
                playtime_seconds: row.get(3)?,
                has_achievements: row.get(4)?,
                excluded_by_user: row.get(5)?,
                unlocked_count: row.get(6)?,
                total_count: row.get(7)?,
                provider_completed: row.get(8)?,
                is_completed: row.get(9)?,
                completion_marker: row.get(10)?,
                last_updated_utc: row.get(11)?,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressOutcome {
    pub id: i64,
    pub inserted: bool,
    pub updated: bool,
    /// Conflicting (user, game) rows removed to make room
    pub removed: usize,
}

fn find_by_cache_key(conn: &Connection, user_id: i64, cache_key: &str) -> Result<Option<ProgressRow>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM UserGameProgress WHERE UserId = ?1 AND CacheKey = ?2",
            PROGRESS_COLUMNS
        ),
        params![user_id, cache_key],
        ProgressRow::from_row,
    )
    .optional()
}

fn find_by_game(conn: &Connection, user_id: i64, game_id: i64) -> Result<Option<ProgressRow>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM UserGameProgress WHERE UserId = ?1 AND GameId = ?2",
            PROGRESS_COLUMNS
        ),
        params![user_id, game_id],
        ProgressRow::from_row,
    )
    .optional()
}

/// Upsert the progress row of `user_id` keyed by cache key, falling back to
/// the (user, game) pair. Writes only when a summary value changed.
pub fn upsert_progress(
    conn: &Connection,
    user_id: i64,
    values: &ProgressValues,
    now: &str,
) -> Result<ProgressOutcome> {
    let mut existing = find_by_cache_key(conn, user_id, &values.cache_key)?;
    if should_use_fallback_lookup(existing.as_ref().map(|row| row.id), true) {
        existing = find_by_game(conn, user_id, values.game_id)?;
    }

    let Some(existing) = existing else {
        conn.execute(
            "INSERT INTO UserGameProgress
                (UserId, GameId, CacheKey, PlaytimeSeconds, HasAchievements, ExcludedByUser,
                 UnlockedCount, TotalCount, ProviderCompleted, IsCompleted, CompletionMarkerApiName,
                 LastUpdatedUtc, CreatedUtc, UpdatedUtc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                user_id,
                values.game_id,
                values.cache_key,
                values.playtime_seconds,
                values.has_achievements,
                values.excluded_by_user,
                values.unlocked_count,
                values.total_count,
                values.provider_completed,
                values.is_completed,
                values.completion_marker,
                values.last_updated_utc,
                now
            ],
        )?;
        return Ok(ProgressOutcome {
            id: conn.last_insert_rowid(),
            inserted: true,
            updated: false,
            removed: 0,
        });
    };

    if existing.values == *values {
        return Ok(ProgressOutcome {
            id: existing.id,
            inserted: false,
            updated: false,
            removed: 0,
        });
    }

    // The row moves to another game: free the (user, game) slot first
    let mut removed = 0;
    if existing.values.game_id != values.game_id {
        removed = conn.execute(
            "DELETE FROM UserGameProgress WHERE UserId = ?1 AND GameId = ?2 AND Id <> ?3",
            params![user_id, values.game_id, existing.id],
        )?;
    }

    conn.execute(
        "UPDATE UserGameProgress
         SET GameId = ?2, CacheKey = ?3, PlaytimeSeconds = ?4, HasAchievements = ?5,
             ExcludedByUser = ?6, UnlockedCount = ?7, TotalCount = ?8, ProviderCompleted = ?9,
             IsCompleted = ?10, CompletionMarkerApiName = ?11, LastUpdatedUtc = ?12, UpdatedUtc = ?13
         WHERE Id = ?1",
        params![
            existing.id,
            values.game_id,
            values.cache_key,
            values.playtime_seconds,
            values.has_achievements,
            values.excluded_by_user,
            values.unlocked_count,
            values.total_count,
            values.provider_completed,
            values.is_completed,
            values.completion_marker,
            values.last_updated_utc,
            now
        ],
    )?;
    Ok(ProgressOutcome {
        id: existing.id,
        inserted: false,
        updated: true,
        removed,
    })
}
