//! Users: one current user per provider

use rusqlite::{params, Connection, OptionalExtension, Result};
use trophy_cache_core::{Provider, UserIdentity};

/// Remembered current user of one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUser {
    pub external_user_id: String,
    pub user_id: i64,
}

/// Make `identity` the provider's current user and return its row id.
///
/// `cached` is reused only when it names the same external id and the row is
/// still current. The returned entry is what the caller should remember once
/// the surrounding transaction commits.
pub fn upsert_current_user(
    conn: &Connection,
    cached: Option<&CachedUser>,
    provider: Provider,
    identity: &UserIdentity,
    now: &str,
) -> Result<CachedUser> {
    let external = identity.external_user_id.trim();

    if let Some(entry) = cached {
        if entry.external_user_id.eq_ignore_ascii_case(external)
            && is_current(conn, entry.user_id)?
        {
            update_display_name(conn, entry.user_id, identity.display_name.as_deref(), now)?;
            return Ok(entry.clone());
        }
    }

    conn.execute(
        "UPDATE Users SET IsCurrentUser = 0, UpdatedUtc = ?3
         WHERE ProviderName = ?1 AND IsCurrentUser = 1 AND ExternalUserId <> ?2",
        params![provider.as_str(), external, now],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO Users
            (ProviderName, ExternalUserId, DisplayName, IsCurrentUser, CreatedUtc, UpdatedUtc)
         VALUES (?1, ?2, ?3, 0, ?4, ?4)",
        params![provider.as_str(), external, identity.display_name, now],
    )?;

    let user_id: i64 = conn.query_row(
        "SELECT Id FROM Users WHERE ProviderName = ?1 AND ExternalUserId = ?2",
        params![provider.as_str(), external],
        |row| row.get(0),
    )?;

    conn.execute(
        "UPDATE Users SET IsCurrentUser = 1, UpdatedUtc = ?2 WHERE Id = ?1 AND IsCurrentUser = 0",
        params![user_id, now],
    )?;
    update_display_name(conn, user_id, identity.display_name.as_deref(), now)?;

    Ok(CachedUser {
        external_user_id: external.to_string(),
        user_id,
    })
}

fn is_current(conn: &Connection, user_id: i64) -> Result<bool> {
    let flag: Option<bool> = conn
        .query_row(
            "SELECT IsCurrentUser FROM Users WHERE Id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(flag.unwrap_or(false))
}

fn update_display_name(
    conn: &Connection,
    user_id: i64,
    display_name: Option<&str>,
    now: &str,
) -> Result<()> {
    // A missing display name never erases a known one
    if let Some(name) = display_name {
        conn.execute(
            "UPDATE Users SET DisplayName = ?2, UpdatedUtc = ?3
             WHERE Id = ?1 AND DisplayName IS NOT ?2",
            params![user_id, name, now],
        )?;
    }
    Ok(())
}

/// External id of the provider's current user
pub fn current_user(conn: &Connection, provider: Provider) -> Result<Option<CachedUser>> {
    conn.query_row(
        "SELECT Id, ExternalUserId FROM Users WHERE ProviderName = ?1 AND IsCurrentUser = 1",
        [provider.as_str()],
        |row| {
            Ok(CachedUser {
                user_id: row.get(0)?,
                external_user_id: row.get(1)?,
            })
        },
    )
    .optional()
}
