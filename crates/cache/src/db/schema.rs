//! Current schema: tables, columns, indexes and the known historical drift

/// Bumped whenever the shape below changes
pub const SCHEMA_VERSION: i64 = 4;

/// A column of the current schema. `add_sql` is the `ALTER TABLE ... ADD
/// COLUMN` tail used when an older database lacks it; key columns that can't
/// be added after the fact have none.
#[derive(Debug)]
pub struct ColumnDef {
    pub name: &'static str,
    pub add_sql: Option<&'static str>,
    /// Data fix run right after the column is added
    pub backfill_sql: Option<&'static str>,
}

#[derive(Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub create_sql: &'static str,
    pub columns: &'static [ColumnDef],
}

#[derive(Debug)]
pub struct IndexDef {
    pub name: &'static str,
    pub table: &'static str,
    /// Columns the index needs to exist before it can be created
    pub columns: &'static [&'static str],
    pub create_sql: &'static str,
    /// Data repair that must run before a unique index can be built
    pub prepare_sql: Option<&'static str>,
}

/// Column renamed between releases
#[derive(Debug)]
pub struct RenamedColumn {
    pub table: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

const fn key(name: &'static str) -> ColumnDef {
    ColumnDef { name, add_sql: None, backfill_sql: None }
}

const fn added(name: &'static str, add_sql: &'static str) -> ColumnDef {
    ColumnDef { name, add_sql: Some(add_sql), backfill_sql: None }
}

pub const METADATA: TableDef = TableDef {
    name: "Metadata",
    create_sql: "CREATE TABLE IF NOT EXISTS Metadata (
        Key TEXT PRIMARY KEY NOT NULL,
        Value TEXT NOT NULL
    )",
    columns: &[key("Key"), key("Value")],
};

pub const USERS: TableDef = TableDef {
    name: "Users",
    create_sql: "CREATE TABLE IF NOT EXISTS Users (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        ProviderName TEXT NOT NULL COLLATE NOCASE,
        ExternalUserId TEXT NOT NULL COLLATE NOCASE,
        DisplayName TEXT,
        IsCurrentUser INTEGER NOT NULL DEFAULT 0,
        FriendSource TEXT,
        CreatedUtc TEXT NOT NULL,
        UpdatedUtc TEXT NOT NULL
    )",
    columns: &[
        key("Id"),
        key("ProviderName"),
        key("ExternalUserId"),
        added("DisplayName", "TEXT"),
        added("IsCurrentUser", "INTEGER NOT NULL DEFAULT 0"),
        added("FriendSource", "TEXT"),
        key("CreatedUtc"),
        key("UpdatedUtc"),
    ],
};

pub const GAMES: TableDef = TableDef {
    name: "Games",
    create_sql: "CREATE TABLE IF NOT EXISTS Games (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        ProviderName TEXT NOT NULL COLLATE NOCASE,
        ProviderGameId INTEGER,
        ExternalLibraryId TEXT COLLATE NOCASE,
        Name TEXT NOT NULL,
        LibrarySourceName TEXT,
        FirstSeenUtc TEXT NOT NULL,
        UpdatedUtc TEXT NOT NULL
    )",
    columns: &[
        key("Id"),
        key("ProviderName"),
        added("ProviderGameId", "INTEGER"),
        added("ExternalLibraryId", "TEXT COLLATE NOCASE"),
        key("Name"),
        added("LibrarySourceName", "TEXT"),
        key("FirstSeenUtc"),
        key("UpdatedUtc"),
    ],
};

pub const ACHIEVEMENT_DEFINITIONS: TableDef = TableDef {
    name: "AchievementDefinitions",
    create_sql: "CREATE TABLE IF NOT EXISTS AchievementDefinitions (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        GameId INTEGER NOT NULL REFERENCES Games(Id) ON DELETE CASCADE,
        ApiName TEXT NOT NULL COLLATE NOCASE,
        DisplayName TEXT NOT NULL,
        Description TEXT,
        UnlockedIconPath TEXT,
        LockedIconPath TEXT,
        Points INTEGER,
        Category TEXT,
        TrophyType TEXT,
        IsHidden INTEGER NOT NULL DEFAULT 0,
        IsCapstone INTEGER NOT NULL DEFAULT 0,
        GlobalPercentUnlocked REAL,
        ProgressMax INTEGER,
        CreatedUtc TEXT NOT NULL,
        UpdatedUtc TEXT NOT NULL
    )",
    columns: &[
        key("Id"),
        key("GameId"),
        key("ApiName"),
        key("DisplayName"),
        added("Description", "TEXT"),
        added("UnlockedIconPath", "TEXT"),
        added("LockedIconPath", "TEXT"),
        added("Points", "INTEGER"),
        added("Category", "TEXT"),
        added("TrophyType", "TEXT"),
        added("IsHidden", "INTEGER NOT NULL DEFAULT 0"),
        added("IsCapstone", "INTEGER NOT NULL DEFAULT 0"),
        added("GlobalPercentUnlocked", "REAL"),
        added("ProgressMax", "INTEGER"),
        key("CreatedUtc"),
        key("UpdatedUtc"),
    ],
};

pub const USER_GAME_PROGRESS: TableDef = TableDef {
    name: "UserGameProgress",
    create_sql: "CREATE TABLE IF NOT EXISTS UserGameProgress (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        UserId INTEGER NOT NULL REFERENCES Users(Id) ON DELETE CASCADE,
        GameId INTEGER NOT NULL REFERENCES Games(Id) ON DELETE CASCADE,
        CacheKey TEXT NOT NULL COLLATE NOCASE,
        PlaytimeSeconds INTEGER NOT NULL DEFAULT 0,
        HasAchievements INTEGER NOT NULL DEFAULT 0,
        ExcludedByUser INTEGER NOT NULL DEFAULT 0,
        UnlockedCount INTEGER NOT NULL DEFAULT 0,
        TotalCount INTEGER NOT NULL DEFAULT 0,
        ProviderCompleted INTEGER NOT NULL DEFAULT 0,
        IsCompleted INTEGER NOT NULL DEFAULT 0,
        CompletionMarkerApiName TEXT COLLATE NOCASE,
        LastUpdatedUtc TEXT,
        CreatedUtc TEXT NOT NULL,
        UpdatedUtc TEXT NOT NULL
    )",
    columns: &[
        key("Id"),
        key("UserId"),
        key("GameId"),
        key("CacheKey"),
        added("PlaytimeSeconds", "INTEGER NOT NULL DEFAULT 0"),
        added("HasAchievements", "INTEGER NOT NULL DEFAULT 0"),
        added("ExcludedByUser", "INTEGER NOT NULL DEFAULT 0"),
        added("UnlockedCount", "INTEGER NOT NULL DEFAULT 0"),
        added("TotalCount", "INTEGER NOT NULL DEFAULT 0"),
        added("ProviderCompleted", "INTEGER NOT NULL DEFAULT 0"),
        ColumnDef {
            name: "IsCompleted",
            add_sql: Some("INTEGER NOT NULL DEFAULT 0"),
            backfill_sql: Some(
                "UPDATE UserGameProgress SET IsCompleted = 1
                 WHERE TotalCount > 0 AND UnlockedCount >= TotalCount",
            ),
        },
        added("CompletionMarkerApiName", "TEXT COLLATE NOCASE"),
        added("LastUpdatedUtc", "TEXT"),
        key("CreatedUtc"),
        key("UpdatedUtc"),
    ],
};

pub const USER_ACHIEVEMENTS: TableDef = TableDef {
    name: "UserAchievements",
    create_sql: "CREATE TABLE IF NOT EXISTS UserAchievements (
        Id INTEGER PRIMARY KEY AUTOINCREMENT,
        UserGameProgressId INTEGER NOT NULL REFERENCES UserGameProgress(Id) ON DELETE CASCADE,
        AchievementDefinitionId INTEGER NOT NULL REFERENCES AchievementDefinitions(Id) ON DELETE CASCADE,
        IsUnlocked INTEGER NOT NULL DEFAULT 0,
        UnlockTimeUtc TEXT,
        ProgressNum INTEGER,
        ProgressDenom INTEGER,
        CreatedUtc TEXT NOT NULL,
        UpdatedUtc TEXT NOT NULL
    )",
    columns: &[
        key("Id"),
        key("UserGameProgressId"),
        key("AchievementDefinitionId"),
        added("IsUnlocked", "INTEGER NOT NULL DEFAULT 0"),
        added("UnlockTimeUtc", "TEXT"),
        added("ProgressNum", "INTEGER"),
        added("ProgressDenom", "INTEGER"),
        key("CreatedUtc"),
        key("UpdatedUtc"),
    ],
};

/// Parents before children
pub const TABLES: &[&TableDef] = &[
    &METADATA,
    &USERS,
    &GAMES,
    &ACHIEVEMENT_DEFINITIONS,
    &USER_GAME_PROGRESS,
    &USER_ACHIEVEMENTS,
];

pub const INDEXES: &[IndexDef] = &[
    IndexDef {
        name: "UX_Users_Provider_ExternalUserId",
        table: "Users",
        columns: &["ProviderName", "ExternalUserId"],
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS UX_Users_Provider_ExternalUserId
                     ON Users(ProviderName, ExternalUserId)",
        // Duplicate accounts collapse onto the current or newest row
        prepare_sql: Some(
            "DELETE FROM Users WHERE Id IN (
                 SELECT Id FROM (
                     SELECT Id, ROW_NUMBER() OVER (
                         PARTITION BY ProviderName, ExternalUserId ORDER BY IsCurrentUser DESC, UpdatedUtc DESC, Id DESC) AS RowRank
                     FROM Users)
                 WHERE RowRank > 1)",
        ),
    },
    IndexDef {
        name: "UX_Users_CurrentPerProvider",
        table: "Users",
        columns: &["ProviderName", "IsCurrentUser"],
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS UX_Users_CurrentPerProvider
                     ON Users(ProviderName) WHERE IsCurrentUser = 1",
        // Older builds could leave several current users per provider; keep the newest
        prepare_sql: Some(
            "UPDATE Users SET IsCurrentUser = 0
             WHERE IsCurrentUser = 1
               AND Id NOT IN (SELECT MAX(Id) FROM Users WHERE IsCurrentUser = 1 GROUP BY ProviderName)",
        ),
    },
    IndexDef {
        name: "UX_Games_Provider_ExternalLibraryId",
        table: "Games",
        columns: &["ProviderName", "ExternalLibraryId"],
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS UX_Games_Provider_ExternalLibraryId
                     ON Games(ProviderName, ExternalLibraryId) WHERE ExternalLibraryId IS NOT NULL",
        // Only the newest row keeps a shared library id
        prepare_sql: Some(
            "UPDATE Games SET ExternalLibraryId = NULL WHERE Id IN (
                 SELECT Id FROM (
                     SELECT Id, ROW_NUMBER() OVER (
                         PARTITION BY ProviderName, ExternalLibraryId ORDER BY UpdatedUtc DESC, Id DESC) AS RowRank
                     FROM Games
                     WHERE ExternalLibraryId IS NOT NULL)
                 WHERE RowRank > 1)",
        ),
    },
    IndexDef {
        name: "UX_Games_Provider_ProviderGameId_Positive",
        table: "Games",
        columns: &["ProviderName", "ProviderGameId"],
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS UX_Games_Provider_ProviderGameId_Positive
                     ON Games(ProviderName, ProviderGameId)
                     WHERE ProviderGameId IS NOT NULL AND ProviderGameId > 0
                       AND ProviderName <> 'RetroAchievements'",
        // Duplicate library entries keep the id on their oldest row only
        prepare_sql: Some(
            "UPDATE Games SET ProviderGameId = NULL
             WHERE ProviderGameId > 0 AND ProviderName <> 'RetroAchievements'
               AND Id NOT IN (
                   SELECT MIN(Id) FROM Games
                   WHERE ProviderGameId > 0 AND ProviderName <> 'RetroAchievements'
                   GROUP BY ProviderName, ProviderGameId)",
        ),
    },
    IndexDef {
        name: "IX_Games_Provider_ProviderGameId",
        table: "Games",
        columns: &["ProviderName", "ProviderGameId"],
        create_sql: "CREATE INDEX IF NOT EXISTS IX_Games_Provider_ProviderGameId
                     ON Games(ProviderName, ProviderGameId)",
        prepare_sql: None,
    },
    IndexDef {
        name: "UX_AchievementDefinitions_Game_ApiName",
        table: "AchievementDefinitions",
        columns: &["GameId", "ApiName"],
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS UX_AchievementDefinitions_Game_ApiName
                     ON AchievementDefinitions(GameId, ApiName)",
        // Keep the newest definition per api name
        prepare_sql: Some(
            "DELETE FROM AchievementDefinitions WHERE Id IN (
                 SELECT Id FROM (
                     SELECT Id, ROW_NUMBER() OVER (
                         PARTITION BY GameId, ApiName ORDER BY UpdatedUtc DESC, Id DESC) AS RowRank
                     FROM AchievementDefinitions)
                 WHERE RowRank > 1)",
        ),
    },
    IndexDef {
        name: "UX_UserGameProgress_User_Game",
        table: "UserGameProgress",
        columns: &["UserId", "GameId"],
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS UX_UserGameProgress_User_Game
                     ON UserGameProgress(UserId, GameId)",
        // Keep the newest progress row per user and game
        prepare_sql: Some(
            "DELETE FROM UserGameProgress WHERE Id IN (
                 SELECT Id FROM (
                     SELECT Id, ROW_NUMBER() OVER (
                         PARTITION BY UserId, GameId ORDER BY UpdatedUtc DESC, Id DESC) AS RowRank
                     FROM UserGameProgress)
                 WHERE RowRank > 1)",
        ),
    },
    IndexDef {
        name: "UX_UserGameProgress_User_CacheKey",
        table: "UserGameProgress",
        columns: &["UserId", "CacheKey"],
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS UX_UserGameProgress_User_CacheKey
                     ON UserGameProgress(UserId, CacheKey)",
        // Keep the newest progress row per user and cache key
        prepare_sql: Some(
            "DELETE FROM UserGameProgress WHERE Id IN (
                 SELECT Id FROM (
                     SELECT Id, ROW_NUMBER() OVER (
                         PARTITION BY UserId, CacheKey ORDER BY UpdatedUtc DESC, Id DESC) AS RowRank
                     FROM UserGameProgress)
                 WHERE RowRank > 1)",
        ),
    },
    IndexDef {
        name: "IX_UserGameProgress_CacheKey",
        table: "UserGameProgress",
        columns: &["CacheKey"],
        create_sql: "CREATE INDEX IF NOT EXISTS IX_UserGameProgress_CacheKey
                     ON UserGameProgress(CacheKey)",
        prepare_sql: None,
    },
    IndexDef {
        name: "IX_UserGameProgress_GameId",
        table: "UserGameProgress",
        columns: &["GameId"],
        create_sql: "CREATE INDEX IF NOT EXISTS IX_UserGameProgress_GameId
                     ON UserGameProgress(GameId)",
        prepare_sql: None,
    },
    IndexDef {
        name: "UX_UserAchievements_Progress_Definition",
        table: "UserAchievements",
        columns: &["UserGameProgressId", "AchievementDefinitionId"],
        create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS UX_UserAchievements_Progress_Definition
                     ON UserAchievements(UserGameProgressId, AchievementDefinitionId)",
        // Keep the newest unlock row per achievement
        prepare_sql: Some(
            "DELETE FROM UserAchievements WHERE Id IN (
                 SELECT Id FROM (
                     SELECT Id, ROW_NUMBER() OVER (
                         PARTITION BY UserGameProgressId, AchievementDefinitionId ORDER BY UpdatedUtc DESC, Id DESC) AS RowRank
                     FROM UserAchievements)
                 WHERE RowRank > 1)",
        ),
    },
    IndexDef {
        name: "IX_UserAchievements_DefinitionId",
        table: "UserAchievements",
        columns: &["AchievementDefinitionId"],
        create_sql: "CREATE INDEX IF NOT EXISTS IX_UserAchievements_DefinitionId
                     ON UserAchievements(AchievementDefinitionId)",
        prepare_sql: None,
    },
];

/// Indexes from older releases that must not survive reconciliation.
/// The provider-game-id index lacked the RetroAchievements carve-out.
pub const SUPERSEDED_INDEXES: &[&str] = &["UX_Games_Provider_ProviderGameId"];

pub const RENAMED_COLUMNS: &[RenamedColumn] = &[
    RenamedColumn {
        table: "Games",
        from: "PlayniteGameId",
        to: "ExternalLibraryId",
    },
    RenamedColumn {
        table: "UserAchievements",
        from: "UnlockTime",
        to: "UnlockTimeUtc",
    },
];

pub fn indexes_for(table: &str) -> impl Iterator<Item = &'static IndexDef> + '_ {
    INDEXES.iter().filter(move |idx| idx.table == table)
}
