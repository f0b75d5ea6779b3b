//! Games: identified by external library id, provider game id or name

use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use trophy_cache_core::decisions::should_use_fallback_lookup;
use trophy_cache_core::{GameAchievementRecord, Provider};

const GAME_COLUMNS: &str = "Id, ProviderGameId, ExternalLibraryId, Name, LibrarySourceName";

#[derive(Debug, Clone, PartialEq)]
pub struct GameRow {
    pub id: i64,
    pub provider_game_id: Option<i64>,
    pub external_library_id: Option<String>,
    pub name: String,
    pub library_source_name: Option<String>,
}

impl GameRow {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider_game_id: row.get(1)?,
            external_library_id: row.get(2)?,
            name: row.get(3)?,
            library_source_name: row.get(4)?,
        })
    }
}

/// The user and cache key a save writes progress under
#[derive(Debug, Clone, Copy)]
pub struct GameOwner<'a> {
    pub user_id: i64,
    pub cache_key: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameOutcome {
    pub id: i64,
    pub inserted: bool,
    pub updated: bool,
}

/// Provider game ids identify a row only when positive
fn usable_provider_game_id(record: &GameAchievementRecord) -> Option<i64> {
    record.provider_game_id.filter(|id| *id > 0)
}

pub fn find_game(
    conn: &Connection,
    provider: Provider,
    record: &GameAchievementRecord,
    owner: GameOwner<'_>,
) -> Result<Option<GameRow>> {
    let pgid = usable_provider_game_id(record);

    if let Some(ext) = record.external_library_id {
        let primary = conn
            .query_row(
                &format!(
                    "SELECT {} FROM Games WHERE ProviderName = ?1 AND ExternalLibraryId = ?2",
                    GAME_COLUMNS
                ),
                params![provider.as_str(), ext.to_string()],
                GameRow::from_row,
            )
            .optional()?;

        // Adopt a row created before the library id was known
        let pgid_usable = pgid.is_some() && !provider.reuses_game_ids();
        if should_use_fallback_lookup(primary.as_ref().map(|g| g.id), pgid_usable) {
            return conn
                .query_row(
                    &format!(
                        "SELECT {} FROM Games
                         WHERE ProviderName = ?1 AND ProviderGameId = ?2 AND ExternalLibraryId IS NULL
                         ORDER BY Id LIMIT 1",
                        GAME_COLUMNS
                    ),
                    params![provider.as_str(), pgid],
                    GameRow::from_row,
                )
                .optional();
        }
        return Ok(primary);
    }

    // Without any id, the game this cache key already points at wins
    if pgid.is_none() {
        if let Some(game) = game_for_cache_key(conn, provider, owner)? {
            return Ok(Some(game));
        }
    }

    let by_pgid = match pgid {
        Some(pgid) => {
            // RetroAchievements ids are shared between entries; only rows
            // without a library id are safe to match on them
            let ext_filter = if provider.reuses_game_ids() {
                " AND ExternalLibraryId IS NULL"
            } else {
                ""
            };
            conn.query_row(
                &format!(
                    "SELECT {} FROM Games WHERE ProviderName = ?1 AND ProviderGameId = ?2{}
                     ORDER BY Id LIMIT 1",
                    GAME_COLUMNS, ext_filter
                ),
                params![provider.as_str(), pgid],
                GameRow::from_row,
            )
            .optional()?
        }
        None => None,
    };

    // Same-titled library entries stay apart once one of the user's other
    // cache keys owns the game
    let name = record.game_name.trim();
    if should_use_fallback_lookup(by_pgid.as_ref().map(|g| g.id), !name.is_empty()) {
        return conn
            .query_row(
                &format!(
                    "SELECT {} FROM Games
                     WHERE ProviderName = ?1 AND Name = ?2 COLLATE NOCASE
                       AND ExternalLibraryId IS NULL AND ProviderGameId IS NULL
                       AND NOT EXISTS (
                           SELECT 1 FROM UserGameProgress p
                           WHERE p.GameId = Games.Id AND p.UserId = ?3 AND p.CacheKey <> ?4)
                     ORDER BY Id LIMIT 1",
                    GAME_COLUMNS
                ),
                params![provider.as_str(), name, owner.user_id, owner.cache_key],
                GameRow::from_row,
            )
            .optional();
    }
    Ok(by_pgid)
}

fn game_for_cache_key(
    conn: &Connection,
    provider: Provider,
    owner: GameOwner<'_>,
) -> Result<Option<GameRow>> {
    conn.query_row(
        "SELECT g.Id, g.ProviderGameId, g.ExternalLibraryId, g.Name, g.LibrarySourceName
         FROM UserGameProgress p
         JOIN Games g ON g.Id = p.GameId
         WHERE p.UserId = ?1 AND p.CacheKey = ?2 AND g.ProviderName = ?3
         ORDER BY p.UpdatedUtc DESC, p.Id DESC
         LIMIT 1",
        params![owner.user_id, owner.cache_key, provider.as_str()],
        GameRow::from_row,
    )
    .optional()
}

/// Insert or refresh the game row for `record`. Known ids are never erased by
/// a record that lacks them.
pub fn upsert_game(
    conn: &Connection,
    provider: Provider,
    record: &GameAchievementRecord,
    owner: GameOwner<'_>,
    now: &str,
) -> Result<GameOutcome> {
    let ext = record.external_library_id.map(|id| id.to_string());
    let pgid = usable_provider_game_id(record);
    let name = record.game_name.trim();
    let source = record
        .library_source_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let existing = find_game(conn, provider, record, owner)?;

    // Another library entry may already own this provider game id
    let pgid = match pgid {
        Some(id) if provider_game_id_taken(conn, provider, id, existing.as_ref().map(|g| g.id))? => {
            tracing::debug!("{} game id {} already belongs to another entry", provider, id);
            None
        }
        other => other,
    };

    let Some(existing) = existing else {
        conn.execute(
            "INSERT INTO Games
                (ProviderName, ProviderGameId, ExternalLibraryId, Name, LibrarySourceName, FirstSeenUtc, UpdatedUtc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![provider.as_str(), pgid, ext, name, source, now],
        )?;
        return Ok(GameOutcome {
            id: conn.last_insert_rowid(),
            inserted: true,
            updated: false,
        });
    };

    let wanted = GameRow {
        id: existing.id,
        provider_game_id: pgid.or(existing.provider_game_id),
        external_library_id: ext.or_else(|| existing.external_library_id.clone()),
        name: if name.is_empty() {
            existing.name.clone()
        } else {
            name.to_string()
        },
        library_source_name: source
            .map(String::from)
            .or_else(|| existing.library_source_name.clone()),
    };

    if wanted == existing {
        return Ok(GameOutcome {
            id: existing.id,
            inserted: false,
            updated: false,
        });
    }

    conn.execute(
        "UPDATE Games
         SET ProviderGameId = ?2, ExternalLibraryId = ?3, Name = ?4, LibrarySourceName = ?5, UpdatedUtc = ?6
         WHERE Id = ?1",
        params![
            wanted.id,
            wanted.provider_game_id,
            wanted.external_library_id,
            wanted.name,
            wanted.library_source_name,
            now
        ],
    )?;
    Ok(GameOutcome {
        id: existing.id,
        inserted: false,
        updated: true,
    })
}

fn provider_game_id_taken(
    conn: &Connection,
    provider: Provider,
    provider_game_id: i64,
    except: Option<i64>,
) -> Result<bool> {
    if provider.reuses_game_ids() {
        return Ok(false);
    }
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM Games
            WHERE ProviderName = ?1 AND ProviderGameId = ?2 AND Id IS NOT ?3
        )",
        params![provider.as_str(), provider_game_id, except],
        |row| row.get(0),
    )
}

/// Delete progress rows keyed by `external_library_id` and the games carrying
/// it. Dependent rows go with them through the foreign keys.
pub fn remove_game(conn: &Connection, external_library_id: &str) -> Result<usize> {
    let progress = conn.execute(
        "DELETE FROM UserGameProgress WHERE CacheKey = ?1",
        [external_library_id],
    )?;
    let games = conn.execute(
        "DELETE FROM Games WHERE ExternalLibraryId = ?1",
        [external_library_id],
    )?;
    Ok(progress + games)
}
