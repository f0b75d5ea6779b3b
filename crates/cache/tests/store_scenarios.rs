use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trophy_cache::db::backup::list_snapshots;
use trophy_cache::{CacheConfig, CacheError, CacheStore, SessionIdentities};
use trophy_cache_core::{AchievementDetail, GameAchievementRecord, Provider, UserIdentity};
use uuid::Uuid;

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

fn unlocked(api: &str, time: DateTime<Utc>) -> AchievementDetail {
    let mut detail = AchievementDetail::new(api, format!("{} name", api));
    detail.unlock_time_utc = Some(time);
    detail
}

fn locked(api: &str) -> AchievementDetail {
    AchievementDetail::new(api, format!("{} name", api))
}

fn steam_record(ext: Uuid, achievements: Vec<AchievementDetail>) -> GameAchievementRecord {
    let mut record = GameAchievementRecord::new("Steam", "Portal 2");
    record.external_library_id = Some(ext);
    record.provider_game_id = Some(620);
    record.has_achievements = true;
    record.last_updated_utc = at(2024, 1, 1);
    record.achievements = achievements;
    record
}

fn raw(dir: &Path) -> Connection {
    Connection::open(CacheConfig::for_data_dir(dir).db_path()).unwrap()
}

fn updated_stamps(conn: &Connection) -> Vec<String> {
    let mut stamps = Vec::new();
    for table in ["Users", "Games", "AchievementDefinitions", "UserGameProgress", "UserAchievements"] {
        let mut stmt = conn
            .prepare(&format!("SELECT Id || ':' || UpdatedUtc FROM {} ORDER BY Id", table))
            .unwrap();
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        stamps.extend(rows.into_iter().map(|r| format!("{}:{}", table, r)));
    }
    stamps
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn test_stale_achievements_are_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    let ext = Uuid::new_v4();
    let key = ext.to_string();
    let t1 = at(2024, 1, 5);
    let t2 = at(2024, 2, 7);

    store
        .save_record(&key, &steam_record(ext, vec![unlocked("ach1", t1), locked("ach2")]))
        .unwrap();
    let first = store.load_record(&key).unwrap().unwrap();
    assert_eq!((first.unlocked_count(), first.total_count()), (1, 2));

    store
        .save_record(&key, &steam_record(ext, vec![unlocked("ach2", t2), locked("ach3")]))
        .unwrap();
    let second = store.load_record(&key).unwrap().unwrap();
    let names: Vec<&str> = second.achievements.iter().map(|a| a.api_name.as_str()).collect();
    assert_eq!(names, vec!["ach2", "ach3"]);
    assert_eq!(second.achievements[0].unlock_time_utc, Some(t2));
    assert!(!second.achievements[1].is_unlocked());

    let conn = raw(dir.path());
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM AchievementDefinitions WHERE ApiName = 'ach1'"),
        0
    );
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM UserAchievements"), 2);
}

#[test]
fn test_saving_the_same_record_twice_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    let ext = Uuid::new_v4();
    let record = steam_record(ext, vec![unlocked("a", at(2023, 3, 3)), locked("b")]);

    let first = store.save_record(&ext.to_string(), &record).unwrap();
    assert!(first.wrote_anything());
    let before = updated_stamps(&raw(dir.path()));

    thread::sleep(Duration::from_millis(20));
    let second = store.save_record(&ext.to_string(), &record).unwrap();
    assert!(!second.wrote_anything());
    assert_eq!(second.definitions.unchanged, 2);
    assert_eq!(second.unlocks.unchanged, 2);
    assert_eq!(updated_stamps(&raw(dir.path())), before);

    // A fresh store (empty user cache) must not write either
    let reopened = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    thread::sleep(Duration::from_millis(20));
    assert!(!reopened.save_record(&ext.to_string(), &record).unwrap().wrote_anything());
    assert_eq!(updated_stamps(&raw(dir.path())), before);
}

#[test]
fn test_load_reproduces_saved_achievements() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    let ext = Uuid::new_v4();

    let mut rich = unlocked("GOLD", at(2022, 8, 1));
    rich.description = Some("Win, twice".to_string());
    rich.unlocked_icon_path = Some("icons/gold.png".to_string());
    rich.locked_icon_path = Some("icons/gold_gray.png".to_string());
    rich.points = Some(90);
    rich.category = Some("Story".to_string());
    rich.trophy_type = Some("gold".to_string());
    rich.hidden = true;
    rich.is_capstone = true;
    rich.global_percent_unlocked = Some(4.5);
    rich.progress_num = Some(3);
    rich.progress_denom = Some(3);

    let mut sentinel = locked("EPOCH");
    sentinel.unlock_time_utc = Some(Utc.timestamp_opt(0, 0).unwrap());
    let mut partial = locked("PARTIAL");
    partial.progress_num = Some(2);
    partial.progress_denom = Some(10);

    let mut record = steam_record(ext, vec![rich.clone(), sentinel, partial.clone()]);
    record.library_source_name = Some("Steam".to_string());
    record.playtime_seconds = 7200;
    record.completion_marker = Some("GOLD".to_string());
    store.save_record(&ext.to_string(), &record).unwrap();

    let loaded = store.load_record(&ext.to_string()).unwrap().unwrap();
    assert_eq!(loaded.provider(), Provider::Steam);
    assert_eq!(loaded.game_name, "Portal 2");
    assert_eq!(loaded.external_library_id, Some(ext));
    assert_eq!(loaded.provider_game_id, Some(620));
    assert_eq!(loaded.playtime_seconds, 7200);
    assert_eq!(loaded.library_source_name.as_deref(), Some("Steam"));
    assert_eq!(loaded.completion_marker.as_deref(), Some("GOLD"));
    assert_eq!(loaded.last_updated_utc, at(2024, 1, 1));
    assert!(loaded.is_completed());

    assert_eq!(loaded.achievements.len(), 3);
    assert_eq!(loaded.achievements[0], rich);
    assert_eq!(loaded.achievements[1].unlock_time_utc, None);
    assert_eq!(loaded.achievements[2], partial);
}

#[test]
fn test_one_current_user_per_provider() {
    let dir = tempfile::tempdir().unwrap();
    let session = Arc::new(SessionIdentities::new());
    let store = CacheStore::with_session(CacheConfig::for_data_dir(dir.path()), session.clone());
    let ext = Uuid::new_v4();
    let record = steam_record(ext, vec![locked("a")]);

    session.set(Provider::Steam, UserIdentity::new("alice"));
    store.save_record("k1", &record).unwrap();
    session.set(Provider::Steam, UserIdentity::new("bob"));
    store.save_record("k2", &record).unwrap();
    session.set(Provider::Steam, UserIdentity::new("alice"));
    store.save_record("k3", &record).unwrap();

    let mut ra = GameAchievementRecord::new("RetroAchievements", "Sonic");
    ra.provider_game_id = Some(1);
    store.save_record("ra", &ra).unwrap();

    let conn = raw(dir.path());
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM Users WHERE ProviderName = 'Steam' AND IsCurrentUser = 1"),
        1
    );
    assert_eq!(store.current_user_id(Provider::Steam).unwrap().as_deref(), Some("alice"));
    // No session or saved account for RetroAchievements
    assert_eq!(
        store.current_user_id(Provider::RetroAchievements).unwrap().as_deref(),
        Some("legacy")
    );

    // bob's row is hidden while alice is current
    let keys = store.list_cached_keys_for_current_users().unwrap();
    assert!(keys.contains("k3"));
    assert!(keys.contains("ra"));
    assert!(!keys.contains("k2"));
}

#[test]
fn test_record_without_achievements_still_tracks_the_game() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    let mut record = GameAchievementRecord::new("Manual", "Solitaire");
    record.playtime_seconds = 60;

    let summary = store.save_record("solitaire", &record).unwrap();
    assert!(summary.game_written && summary.progress_written);

    let loaded = store.load_record("SOLITAIRE").unwrap().unwrap();
    assert_eq!(loaded.total_count(), 0);
    assert!(!loaded.is_completed());
    assert!(store.has_any_current_user_rows().unwrap());
}

#[test]
fn test_invalid_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    let record = GameAchievementRecord::new("Steam", "Portal");

    assert!(matches!(
        store.save_record("  ", &record),
        Err(CacheError::InvalidInput(_))
    ));
    assert!(matches!(store.set_metadata("", "v"), Err(CacheError::InvalidInput(_))));
    assert!(matches!(store.remove_game(""), Err(CacheError::InvalidInput(_))));
    assert_eq!(store.get_metadata(" ").unwrap(), None);
    assert_eq!(store.load_record("").unwrap(), None);
}

#[test]
fn test_clear_all_keeps_users_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    let ext = Uuid::new_v4();
    store
        .save_record(&ext.to_string(), &steam_record(ext, vec![unlocked("a", at(2024, 1, 2))]))
        .unwrap();
    store.set_metadata("note", "kept").unwrap();

    store.clear_all().unwrap();
    assert!(!store.has_any_current_user_rows().unwrap());
    assert!(store.load_all_records().unwrap().is_empty());
    assert_eq!(store.get_metadata("note").unwrap().as_deref(), Some("kept"));

    let conn = raw(dir.path());
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM Users"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM Games"), 0);

    // The store keeps working after the user cache is dropped
    store
        .save_record(&ext.to_string(), &steam_record(ext, vec![locked("a")]))
        .unwrap();
    assert!(store.load_record(&ext.to_string()).unwrap().is_some());
}

#[test]
fn test_remove_game_forgets_one_library_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    let keep = Uuid::new_v4();
    let gone = Uuid::new_v4();
    store.save_record(&keep.to_string(), &steam_record(keep, vec![locked("a")])).unwrap();
    let mut other = steam_record(gone, vec![locked("b")]);
    other.provider_game_id = Some(400);
    other.game_name = "Portal".to_string();
    store.save_record(&gone.to_string(), &other).unwrap();

    assert_eq!(store.remove_game(&gone.to_string().to_uppercase()).unwrap(), 2);
    assert!(store.load_record(&gone.to_string()).unwrap().is_none());
    assert!(store.load_record(&keep.to_string()).unwrap().is_some());

    let conn = raw(dir.path());
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM AchievementDefinitions"), 1);
}

#[test]
fn test_load_all_returns_one_record_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    store.save_record(&a.to_string(), &steam_record(a, vec![locked("x"), locked("y")])).unwrap();
    let mut other = steam_record(b, vec![unlocked("z", at(2024, 4, 4))]);
    other.provider_game_id = Some(400);
    store.save_record(&b.to_string(), &other).unwrap();

    let all = store.load_all_records().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[&a.to_string()].total_count(), 2);
    assert_eq!(all[&b.to_string()].unlocked_count(), 1);
}

#[test]
fn test_export_writes_table_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));
    let ext = Uuid::new_v4();
    store
        .save_record(&ext.to_string(), &steam_record(ext, vec![unlocked("a", at(2024, 1, 2))]))
        .unwrap();

    let files = store.export_to_dir(&dir.path().join("out")).unwrap();
    assert_eq!(files.len(), 7);
    let summary = std::fs::read_to_string(dir.path().join("out").join("Summary.csv")).unwrap();
    assert_eq!(summary.lines().count(), 2);
    assert!(summary.contains("Portal 2"));
}

const V1_SCHEMA: &str = "
CREATE TABLE Metadata (Key TEXT PRIMARY KEY NOT NULL, Value TEXT NOT NULL);
CREATE TABLE Users (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    ProviderName TEXT NOT NULL COLLATE NOCASE,
    ExternalUserId TEXT NOT NULL COLLATE NOCASE,
    DisplayName TEXT,
    IsCurrentUser INTEGER NOT NULL DEFAULT 0,
    CreatedUtc TEXT NOT NULL,
    UpdatedUtc TEXT NOT NULL
);
CREATE TABLE Games (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    ProviderName TEXT NOT NULL COLLATE NOCASE,
    ProviderGameId INTEGER,
    PlayniteGameId TEXT COLLATE NOCASE,
    Name TEXT NOT NULL,
    LibrarySourceName TEXT,
    FirstSeenUtc TEXT NOT NULL,
    UpdatedUtc TEXT NOT NULL
);
CREATE UNIQUE INDEX UX_Games_Provider_ProviderGameId
    ON Games(ProviderName, ProviderGameId) WHERE ProviderGameId > 0;
CREATE TABLE AchievementDefinitions (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    GameId INTEGER NOT NULL REFERENCES Games(Id) ON DELETE CASCADE,
    ApiName TEXT NOT NULL COLLATE NOCASE,
    DisplayName TEXT NOT NULL,
    Description TEXT,
    UnlockedIconPath TEXT,
    LockedIconPath TEXT,
    Points INTEGER,
    Category TEXT,
    IsHidden INTEGER NOT NULL DEFAULT 0,
    GlobalPercentUnlocked REAL,
    CreatedUtc TEXT NOT NULL,
    UpdatedUtc TEXT NOT NULL
);
CREATE TABLE UserGameProgress (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    UserId INTEGER NOT NULL REFERENCES Users(Id) ON DELETE CASCADE,
    GameId INTEGER NOT NULL REFERENCES Games(Id) ON DELETE CASCADE,
    CacheKey TEXT NOT NULL COLLATE NOCASE,
    PlaytimeSeconds INTEGER NOT NULL DEFAULT 0,
    HasAchievements INTEGER NOT NULL DEFAULT 0,
    UnlockedCount INTEGER NOT NULL DEFAULT 0,
    TotalCount INTEGER NOT NULL DEFAULT 0,
    LastUpdatedUtc TEXT,
    CreatedUtc TEXT NOT NULL,
    UpdatedUtc TEXT NOT NULL
);
CREATE TABLE UserAchievements (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    UserGameProgressId INTEGER NOT NULL REFERENCES UserGameProgress(Id) ON DELETE CASCADE,
    AchievementDefinitionId INTEGER NOT NULL REFERENCES AchievementDefinitions(Id) ON DELETE CASCADE,
    IsUnlocked INTEGER NOT NULL DEFAULT 0,
    UnlockTime TEXT,
    CreatedUtc TEXT NOT NULL,
    UpdatedUtc TEXT NOT NULL
);
INSERT INTO Metadata (Key, Value) VALUES ('schema_version', '1');
";

#[test]
fn test_old_schema_is_upgraded_once_with_a_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::for_data_dir(dir.path());
    let ext = Uuid::new_v4();
    {
        let conn = Connection::open(config.db_path()).unwrap();
        conn.execute_batch(V1_SCHEMA).unwrap();
        conn.execute_batch(&format!(
            "INSERT INTO Users (Id, ProviderName, ExternalUserId, IsCurrentUser, CreatedUtc, UpdatedUtc)
             VALUES (1, 'Steam', 'legacy', 1, 't', 't');
             INSERT INTO Games (Id, ProviderName, ProviderGameId, PlayniteGameId, Name, FirstSeenUtc, UpdatedUtc)
             VALUES (1, 'Steam', 620, '{ext}', 'Portal 2', 't', 't');
             INSERT INTO AchievementDefinitions (Id, GameId, ApiName, DisplayName, CreatedUtc, UpdatedUtc)
             VALUES (1, 1, 'ACH_WIN', 'Win', 't', 't');
             INSERT INTO UserGameProgress (Id, UserId, GameId, CacheKey, UnlockedCount, TotalCount, CreatedUtc, UpdatedUtc)
             VALUES (1, 1, 1, '{ext}', 1, 1, 't', '2020-01-01T00:00:00.000Z');
             INSERT INTO UserAchievements (UserGameProgressId, AchievementDefinitionId, IsUnlocked, UnlockTime, CreatedUtc, UpdatedUtc)
             VALUES (1, 1, 1, '2020-01-01T10:00:00.000Z', 't', 't');",
            ext = ext
        ))
        .unwrap();
    }

    let store = CacheStore::new(config.clone());
    let report = store.migration_report().unwrap();
    assert_eq!(report.previous_version, 1);
    assert!(report.applied.iter().any(|c| c == "rename Games.PlayniteGameId to ExternalLibraryId"));
    assert!(report.applied.iter().any(|c| c == "rename UserAchievements.UnlockTime to UnlockTimeUtc"));
    assert!(report.applied.iter().any(|c| c == "add column AchievementDefinitions.ProgressMax"));
    assert!(report
        .applied
        .iter()
        .any(|c| c == "drop superseded index UX_Games_Provider_ProviderGameId"));
    assert!(report.snapshot.is_some());
    assert_eq!(list_snapshots(&config.backup_root()).unwrap().len(), 1);

    let loaded = store.load_record(&ext.to_string()).unwrap().unwrap();
    assert_eq!(loaded.external_library_id, Some(ext));
    assert_eq!(
        loaded.achievements[0].unlock_time_utc,
        Some(Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap())
    );

    let conn = raw(dir.path());
    assert_eq!(count(&conn, "SELECT IsCompleted FROM UserGameProgress WHERE Id = 1"), 1);
    drop(conn);
    drop(store);

    let reopened = CacheStore::new(config.clone());
    let again = reopened.migration_report().unwrap();
    assert_eq!(again.previous_version, 4);
    assert!(again.applied.is_empty());
    assert!(again.snapshot.is_none());
    assert_eq!(list_snapshots(&config.backup_root()).unwrap().len(), 1);
}

#[test]
fn test_failed_open_is_reported_without_another_pass() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::for_data_dir(dir.path());
    CacheStore::new(config.clone()).ensure_initialized().unwrap();
    {
        // CacheKey can't be added back, so verification must fail
        let conn = raw(dir.path());
        conn.execute_batch(
            "DROP INDEX UX_UserGameProgress_User_CacheKey;
             DROP INDEX IX_UserGameProgress_CacheKey;
             DROP INDEX IX_Games_Provider_ProviderGameId;
             ALTER TABLE UserGameProgress DROP COLUMN CacheKey;",
        )
        .unwrap();
    }

    let store = CacheStore::new(config.clone());
    match store.ensure_initialized() {
        Err(CacheError::SchemaVerification(problems)) => {
            assert!(problems.contains(&"missing column UserGameProgress.CacheKey".to_string()));
        }
        other => panic!("expected a verification failure, got {:?}", other),
    }
    for _ in 0..4 {
        assert!(matches!(store.has_any_current_user_rows(), Err(CacheError::OpenFailed(_))));
    }
    assert!(matches!(store.get_metadata("k"), Err(CacheError::OpenFailed(_))));
    assert_eq!(list_snapshots(&config.backup_root()).unwrap().len(), 1);

    // The rolled back pass left the planned index uncreated
    let conn = raw(dir.path());
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'IX_Games_Provider_ProviderGameId'"
        ),
        0
    );
}

#[test]
fn test_same_title_under_two_library_entries_keeps_both_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(CacheConfig::for_data_dir(dir.path()));

    let mut gameboy = GameAchievementRecord::new("Manual", "Tetris");
    gameboy.achievements = vec![unlocked("lines_10", at(2024, 3, 1))];
    let mut nes = GameAchievementRecord::new("Manual", "Tetris");
    nes.achievements = vec![locked("lines_10"), locked("lines_100")];

    let first = store.save_record("gameboy-tetris", &gameboy).unwrap();
    let second = store.save_record("nes-tetris", &nes).unwrap();
    assert_ne!(first.game_id, second.game_id);
    assert_ne!(first.progress_id, second.progress_id);

    let mut keys: Vec<String> = store.list_cached_keys_for_current_users().unwrap().into_iter().collect();
    keys.sort();
    assert_eq!(keys, vec!["gameboy-tetris".to_string(), "nes-tetris".to_string()]);
    assert_eq!(store.load_record("gameboy-tetris").unwrap().unwrap().unlocked_count(), 1);
    assert_eq!(store.load_record("nes-tetris").unwrap().unwrap().total_count(), 2);

    // Re-saving under the first key stays on its own game
    let again = store.save_record("gameboy-tetris", &gameboy).unwrap();
    assert_eq!(again.game_id, first.game_id);
    assert!(!again.wrote_anything());
}

#[test]
fn test_concurrent_saves_from_many_threads() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CacheStore::new(CacheConfig::for_data_dir(dir.path())));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    let ext = Uuid::new_v4();
                    let mut record = steam_record(ext, vec![unlocked("ach1", at(2024, 1, 2)), locked("ach2")]);
                    record.game_name = format!("Game {}-{}", worker, i);
                    record.provider_game_id = Some(1000 + worker * 10 + i);
                    store.save_record(&ext.to_string(), &record).unwrap();
                    assert!(store.load_record(&ext.to_string()).unwrap().is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.list_cached_keys_for_current_users().unwrap().len(), 80);
    let all = store.load_all_records().unwrap();
    assert_eq!(all.len(), 80);
    assert!(all.values().all(|r| r.unlocked_count() == 1 && r.total_count() == 2));
}
