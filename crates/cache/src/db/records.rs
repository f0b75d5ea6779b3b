//! Rebuilding `GameAchievementRecord`s for the current users

use rusqlite::{Connection, Result, Row};
use std::collections::{HashMap, HashSet};
use trophy_cache_core::{AchievementDetail, GameAchievementRecord};
use uuid::Uuid;

use super::{from_db_time, seconds_from_sql};

const HEADER_COLUMNS: &str = "p.Id, p.CacheKey, p.PlaytimeSeconds, p.HasAchievements, \
     p.ExcludedByUser, p.ProviderCompleted, p.CompletionMarkerApiName, p.LastUpdatedUtc, \
     p.UpdatedUtc, g.ProviderName, g.ProviderGameId, g.ExternalLibraryId, g.Name, \
     g.LibrarySourceName";

const DETAIL_COLUMNS: &str = "ua.UserGameProgressId, d.ApiName, d.DisplayName, d.Description, \
     d.UnlockedIconPath, d.LockedIconPath, d.Points, d.Category, d.TrophyType, d.IsHidden, \
     d.IsCapstone, d.GlobalPercentUnlocked, ua.IsUnlocked, ua.UnlockTimeUtc, ua.ProgressNum, \
     COALESCE(ua.ProgressDenom, d.ProgressMax)";

/// Newest progress row per cache key among current users
const RANKED_PROGRESS: &str = "WITH ranked AS (
        SELECT p.Id AS ProgressId,
               ROW_NUMBER() OVER (
                   PARTITION BY p.CacheKey COLLATE NOCASE
                   ORDER BY p.UpdatedUtc DESC, p.Id DESC
               ) AS RowRank
        FROM UserGameProgress p
        JOIN Users u ON u.Id = p.UserId
        WHERE u.IsCurrentUser = 1
    )";

struct Header {
    progress_id: i64,
    cache_key: String,
    record: GameAchievementRecord,
}

fn header_from_row(row: &Row) -> Result<Header> {
    let cache_key: String = row.get(1)?;
    let last_updated: Option<String> = row.get(7)?;
    let updated: String = row.get(8)?;
    let external: Option<String> = row.get(11)?;

    // Library ids missing from old rows are recovered from GUID-shaped keys
    // in memory only
    let external_library_id = external
        .as_deref()
        .and_then(|id| Uuid::parse_str(id.trim()).ok())
        .or_else(|| Uuid::parse_str(cache_key.trim()).ok());

    let last_updated_utc = last_updated
        .as_deref()
        .and_then(from_db_time)
        .or_else(|| from_db_time(&updated))
        .unwrap_or_default();

    let mut record = GameAchievementRecord::new(row.get::<_, String>(9)?, row.get::<_, String>(12)?);
    record.library_source_name = row.get(13)?;
    record.external_library_id = external_library_id;
    record.provider_game_id = row.get(10)?;
    record.playtime_seconds = seconds_from_sql(row.get(2)?);
    record.has_achievements = row.get(3)?;
    record.excluded_by_user = row.get(4)?;
    record.provider_completed = row.get(5)?;
    record.completion_marker = row.get(6)?;
    record.last_updated_utc = last_updated_utc;

    Ok(Header {
        progress_id: row.get(0)?,
        cache_key,
        record,
    })
}

fn detail_from_row(row: &Row) -> Result<(i64, AchievementDetail)> {
    let is_unlocked: bool = row.get(12)?;
    let unlock_time: Option<String> = row.get(13)?;

    let detail = AchievementDetail {
        api_name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        unlocked_icon_path: row.get(4)?,
        locked_icon_path: row.get(5)?,
        points: row.get(6)?,
        category: row.get(7)?,
        trophy_type: row.get(8)?,
        hidden: row.get(9)?,
        is_capstone: row.get(10)?,
        global_percent_unlocked: row.get(11)?,
        unlock_time_utc: if is_unlocked {
            unlock_time.as_deref().and_then(from_db_time)
        } else {
            None
        },
        progress_num: row.get(14)?,
        progress_denom: row.get(15)?,
    };
    Ok((row.get(0)?, detail))
}

pub fn has_any_current_user_rows(conn: &Connection) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM UserGameProgress p
            JOIN Users u ON u.Id = p.UserId
            WHERE u.IsCurrentUser = 1
        )",
        [],
        |row| row.get(0),
    )
}

/// Distinct cache keys of every provider's current user, compared
/// case-insensitively
pub fn list_cached_keys(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT p.CacheKey FROM UserGameProgress p
         JOIN Users u ON u.Id = p.UserId
         WHERE u.IsCurrentUser = 1
         ORDER BY p.UpdatedUtc DESC, p.Id DESC",
    )?;
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    Ok(keys
        .into_iter()
        .filter(|key| seen.insert(key.to_lowercase()))
        .collect())
}

pub fn load_record(conn: &Connection, cache_key: &str) -> Result<Option<GameAchievementRecord>> {
    let header = match conn.query_row(
        &format!(
            "SELECT {} FROM UserGameProgress p
             JOIN Users u ON u.Id = p.UserId
             JOIN Games g ON g.Id = p.GameId
             WHERE u.IsCurrentUser = 1 AND p.CacheKey = ?1
             ORDER BY p.UpdatedUtc DESC, p.Id DESC
             LIMIT 1",
            HEADER_COLUMNS
        ),
        [cache_key],
        header_from_row,
    ) {
        Ok(header) => header,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM UserAchievements ua
         JOIN AchievementDefinitions d ON d.Id = ua.AchievementDefinitionId
         WHERE ua.UserGameProgressId = ?1
         ORDER BY d.Id",
        DETAIL_COLUMNS
    ))?;
    let details = stmt
        .query_map([header.progress_id], detail_from_row)?
        .collect::<Result<Vec<_>>>()?;

    let mut record = header.record;
    record.achievements = details.into_iter().map(|(_, detail)| detail).collect();
    Ok(Some(record))
}

/// Every current-user record keyed by cache key. When a key has several
/// rows only the newest one is returned.
pub fn load_all_records(conn: &Connection) -> Result<HashMap<String, GameAchievementRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{} SELECT {} FROM ranked r
         JOIN UserGameProgress p ON p.Id = r.ProgressId
         JOIN Games g ON g.Id = p.GameId
         WHERE r.RowRank = 1",
        RANKED_PROGRESS, HEADER_COLUMNS
    ))?;
    let headers = stmt
        .query_map([], header_from_row)?
        .collect::<Result<Vec<_>>>()?;

    let mut keys_by_progress: HashMap<i64, String> = HashMap::with_capacity(headers.len());
    let mut records: HashMap<String, GameAchievementRecord> = HashMap::with_capacity(headers.len());
    for header in headers {
        keys_by_progress.insert(header.progress_id, header.cache_key.clone());
        records.insert(header.cache_key, header.record);
    }

    let mut stmt = conn.prepare(&format!(
        "{} SELECT {} FROM ranked r
         JOIN UserAchievements ua ON ua.UserGameProgressId = r.ProgressId
         JOIN AchievementDefinitions d ON d.Id = ua.AchievementDefinitionId
         WHERE r.RowRank = 1
         ORDER BY ua.UserGameProgressId, d.Id",
        RANKED_PROGRESS, DETAIL_COLUMNS
    ))?;
    let rows = stmt.query_map([], detail_from_row)?;
    for row in rows {
        let (progress_id, detail) = row?;
        if let Some(record) = keys_by_progress
            .get(&progress_id)
            .and_then(|key| records.get_mut(key))
        {
            record.achievements.push(detail);
        }
    }

    Ok(records)
}
