//! Achievement definitions (per game) and unlock rows (per progress row)

use rusqlite::{params, Connection, Result, Row};
use std::collections::{HashMap, HashSet};
use trophy_cache_core::decisions::stale_definition_ids;
use trophy_cache_core::AchievementDetail;

use super::to_db_time;

/// Insert/update/unchanged/delete tally of one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
}

impl SyncCounts {
    pub fn wrote_anything(&self) -> bool {
        self.inserted + self.updated + self.removed > 0
    }
}

/// Mutable fields of a definition row
#[derive(Debug, Clone, PartialEq)]
struct DefinitionValues {
    api_name: String,
    display_name: String,
    description: Option<String>,
    unlocked_icon_path: Option<String>,
    locked_icon_path: Option<String>,
    points: Option<i32>,
    category: Option<String>,
    trophy_type: Option<String>,
    hidden: bool,
    is_capstone: bool,
    global_percent_unlocked: Option<f64>,
    progress_max: Option<i32>,
}

impl DefinitionValues {
    fn from_detail(detail: &AchievementDetail) -> Self {
        Self {
            api_name: detail.api_name.trim().to_string(),
            display_name: detail.display_name.clone(),
            description: detail.description.clone(),
            unlocked_icon_path: detail.unlocked_icon_path.clone(),
            locked_icon_path: detail.locked_icon_path.clone(),
            points: detail.points,
            category: detail.category.clone(),
            trophy_type: detail.trophy_type.clone(),
            hidden: detail.hidden,
            is_capstone: detail.is_capstone,
            // NaN never compares equal and would defeat change detection
            global_percent_unlocked: detail.global_percent_unlocked.filter(|p| !p.is_nan()),
            progress_max: detail.progress_denom,
        }
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
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
            progress_max: row.get(12)?,
        })
    }
}

/// Stored definitions of a game keyed by lower-cased api name
fn load_definitions(conn: &Connection, game_id: i64) -> Result<HashMap<String, (i64, DefinitionValues)>> {
    let mut stmt = conn.prepare(
        "SELECT Id, ApiName, DisplayName, Description, UnlockedIconPath, LockedIconPath, Points,
                Category, TrophyType, IsHidden, IsCapstone, GlobalPercentUnlocked, ProgressMax
         FROM AchievementDefinitions WHERE GameId = ?1",
    )?;
    let rows = stmt
        .query_map([game_id], |row| Ok((row.get::<_, i64>(0)?, DefinitionValues::from_row(row)?)))?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows
        .into_iter()
        .map(|(id, values)| (values.api_name.to_lowercase(), (id, values)))
        .collect())
}

/// Make the game's definitions equal `incoming` (already de-duplicated).
/// Returns the definition id of every incoming api name (lower-cased).
pub fn sync_definitions(
    conn: &Connection,
    game_id: i64,
    incoming: &[&AchievementDetail],
    now: &str,
) -> Result<(HashMap<String, i64>, SyncCounts)> {
    let existing = load_definitions(conn, game_id)?;
    let mut counts = SyncCounts::default();
    let mut ids = HashMap::with_capacity(incoming.len());

    let mut insert = conn.prepare_cached(
        "INSERT INTO AchievementDefinitions
            (GameId, ApiName, DisplayName, Description, UnlockedIconPath, LockedIconPath, Points,
             Category, TrophyType, IsHidden, IsCapstone, GlobalPercentUnlocked, ProgressMax,
             CreatedUtc, UpdatedUtc)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
    )?;
    let mut update = conn.prepare_cached(
        "UPDATE AchievementDefinitions
         SET ApiName = ?2, DisplayName = ?3, Description = ?4, UnlockedIconPath = ?5,
             LockedIconPath = ?6, Points = ?7, Category = ?8, TrophyType = ?9, IsHidden = ?10,
             IsCapstone = ?11, GlobalPercentUnlocked = ?12, ProgressMax = ?13, UpdatedUtc = ?14
         WHERE Id = ?1",
    )?;

    for detail in incoming {
        let values = DefinitionValues::from_detail(detail);
        let key = values.api_name.to_lowercase();
        match existing.get(&key) {
            Some((id, stored)) if *stored == values => {
                counts.unchanged += 1;
                ids.insert(key, *id);
            }
            Some((id, _)) => {
                update.execute(params![
                    id,
                    values.api_name,
                    values.display_name,
                    values.description,
                    values.unlocked_icon_path,
                    values.locked_icon_path,
                    values.points,
                    values.category,
                    values.trophy_type,
                    values.hidden,
                    values.is_capstone,
                    values.global_percent_unlocked,
                    values.progress_max,
                    now
                ])?;
                counts.updated += 1;
                ids.insert(key, *id);
            }
            None => {
                insert.execute(params![
                    game_id,
                    values.api_name,
                    values.display_name,
                    values.description,
                    values.unlocked_icon_path,
                    values.locked_icon_path,
                    values.points,
                    values.category,
                    values.trophy_type,
                    values.hidden,
                    values.is_capstone,
                    values.global_percent_unlocked,
                    values.progress_max,
                    now
                ])?;
                counts.inserted += 1;
                ids.insert(key, conn.last_insert_rowid());
            }
        }
    }

    let stored_names: HashMap<String, i64> = existing
        .into_values()
        .map(|(id, values)| (values.api_name, id))
        .collect();
    let desired: HashSet<String> = incoming.iter().map(|d| d.api_name.trim().to_string()).collect();
    for id in stale_definition_ids(&stored_names, &desired) {
        // Unlock rows of every user go with the definition
        counts.removed += conn.execute("DELETE FROM AchievementDefinitions WHERE Id = ?1", [id])?;
    }

    Ok((ids, counts))
}

/// Per-user state of one achievement
#[derive(Debug, Clone, PartialEq, Eq)]
struct UnlockValues {
    is_unlocked: bool,
    unlock_time_utc: Option<String>,
    progress_num: Option<i32>,
    progress_denom: Option<i32>,
}

impl UnlockValues {
    fn from_detail(detail: &AchievementDetail) -> Self {
        let unlock_time = detail.effective_unlock_time();
        Self {
            is_unlocked: unlock_time.is_some(),
            unlock_time_utc: unlock_time.as_ref().map(to_db_time),
            progress_num: detail.progress_num,
            progress_denom: detail.progress_denom,
        }
    }
}

/// Make the progress row's unlock rows match `desired` (definition id, detail)
pub fn sync_user_achievements(
    conn: &Connection,
    progress_id: i64,
    desired: &[(i64, &AchievementDetail)],
    now: &str,
) -> Result<SyncCounts> {
    let mut existing: HashMap<i64, (i64, UnlockValues)> = {
        let mut stmt = conn.prepare(
            "SELECT Id, AchievementDefinitionId, IsUnlocked, UnlockTimeUtc, ProgressNum, ProgressDenom
             FROM UserAchievements WHERE UserGameProgressId = ?1",
        )?;
        let rows = stmt
            .query_map([progress_id], |row| {
                Ok((
                    row.get::<_, i64>(1)?,
                    (
                        row.get::<_, i64>(0)?,
                        UnlockValues {
                            is_unlocked: row.get(2)?,
                            unlock_time_utc: row.get(3)?,
                            progress_num: row.get(4)?,
                            progress_denom: row.get(5)?,
                        },
                    ),
                ))
            })?
            .collect::<Result<Vec<_>>>()?;
        rows.into_iter().collect()
    };

    let mut counts = SyncCounts::default();
    let mut insert = conn.prepare_cached(
        "INSERT INTO UserAchievements
            (UserGameProgressId, AchievementDefinitionId, IsUnlocked, UnlockTimeUtc,
             ProgressNum, ProgressDenom, CreatedUtc, UpdatedUtc)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
    )?;
    let mut update = conn.prepare_cached(
        "UPDATE UserAchievements
         SET IsUnlocked = ?2, UnlockTimeUtc = ?3, ProgressNum = ?4, ProgressDenom = ?5, UpdatedUtc = ?6
         WHERE Id = ?1",
    )?;

    for (definition_id, detail) in desired {
        let values = UnlockValues::from_detail(detail);
        match existing.remove(definition_id) {
            Some((_, stored)) if stored == values => counts.unchanged += 1,
            Some((id, _)) => {
                update.execute(params![
                    id,
                    values.is_unlocked,
                    values.unlock_time_utc,
                    values.progress_num,
                    values.progress_denom,
                    now
                ])?;
                counts.updated += 1;
            }
            None => {
                insert.execute(params![
                    progress_id,
                    definition_id,
                    values.is_unlocked,
                    values.unlock_time_utc,
                    values.progress_num,
                    values.progress_denom,
                    now
                ])?;
                counts.inserted += 1;
            }
        }
    }

    for (id, _) in existing.into_values() {
        counts.removed += conn.execute("DELETE FROM UserAchievements WHERE Id = ?1", [id])?;
    }

    Ok(counts)
}
