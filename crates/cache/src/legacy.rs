//! One-shot import of the per-game JSON files older releases wrote
//!
//! Each `<cache key>.json` file holds one game. Imported files are deleted,
//! unreadable ones are moved to `_quarantine/`, and the outcome is recorded in
//! metadata so the import runs again only while files remain.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use trophy_cache_core::constants::{
    META_LEGACY_COMPLETED, META_LEGACY_DB_WRITE_FAILED, META_LEGACY_DELETED,
    META_LEGACY_DELETE_FAILED, META_LEGACY_IMPORTED, META_LEGACY_LAST_RUN,
    META_LEGACY_PARSE_FAILED, META_LEGACY_QUARANTINED, META_LEGACY_REMAINING,
};
use trophy_cache_core::decisions::legacy_import_done;
use trophy_cache_core::{AchievementDetail, GameAchievementRecord, ValidationError};
use uuid::Uuid;

use crate::db::CacheStore;
use crate::error::Result;

pub const QUARANTINE_DIR_NAME: &str = "_quarantine";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyAchievement {
    #[serde(default)]
    api_name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "UnlockedIconUrl")]
    unlocked_icon_path: Option<String>,
    #[serde(default, alias = "LockedIconUrl")]
    locked_icon_path: Option<String>,
    #[serde(default)]
    points: Option<i32>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    trophy_type: Option<String>,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    is_capstone: bool,
    #[serde(default)]
    global_percent_unlocked: Option<f64>,
    /// ISO text; old writers used `0001-01-01T00:00:00` for "locked"
    #[serde(default, alias = "DateUnlocked", alias = "UnlockTime")]
    unlock_time_utc: Option<String>,
    #[serde(default)]
    progress_num: Option<i32>,
    #[serde(default)]
    progress_denom: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyGameFile {
    #[serde(default, alias = "Provider")]
    provider_name: String,
    #[serde(alias = "Name")]
    game_name: String,
    #[serde(default, alias = "SourceName")]
    library_source_name: Option<String>,
    #[serde(default, alias = "PlayniteGameId")]
    external_library_id: Option<String>,
    #[serde(default, alias = "AppId")]
    provider_game_id: Option<i64>,
    #[serde(default, alias = "Playtime")]
    playtime_seconds: u64,
    #[serde(default)]
    has_achievements: bool,
    #[serde(default)]
    excluded_by_user: bool,
    #[serde(default)]
    provider_completed: bool,
    #[serde(default)]
    completion_marker: Option<String>,
    #[serde(default)]
    last_updated_utc: Option<String>,
    #[serde(default, alias = "Items")]
    achievements: Vec<LegacyAchievement>,
}

fn parse_legacy_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

impl LegacyAchievement {
    fn into_detail(self) -> AchievementDetail {
        AchievementDetail {
            api_name: self.api_name,
            display_name: self.display_name,
            description: self.description,
            unlocked_icon_path: self.unlocked_icon_path,
            locked_icon_path: self.locked_icon_path,
            points: self.points,
            category: self.category,
            trophy_type: self.trophy_type,
            hidden: self.hidden,
            is_capstone: self.is_capstone,
            global_percent_unlocked: self.global_percent_unlocked,
            unlock_time_utc: self.unlock_time_utc.as_deref().and_then(parse_legacy_time),
            progress_num: self.progress_num,
            progress_denom: self.progress_denom,
        }
    }
}

impl LegacyGameFile {
    fn into_record(self) -> GameAchievementRecord {
        let mut record = GameAchievementRecord::new(self.provider_name, self.game_name);
        record.library_source_name = self.library_source_name;
        record.external_library_id = self
            .external_library_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id.trim()).ok());
        record.provider_game_id = self.provider_game_id;
        record.playtime_seconds = self.playtime_seconds;
        record.has_achievements = self.has_achievements || !self.achievements.is_empty();
        record.excluded_by_user = self.excluded_by_user;
        record.provider_completed = self.provider_completed;
        record.completion_marker = self.completion_marker;
        if let Some(time) = self.last_updated_utc.as_deref().and_then(parse_legacy_time) {
            record.last_updated_utc = time;
        }
        record.achievements = self
            .achievements
            .into_iter()
            .map(LegacyAchievement::into_detail)
            .collect();
        record
    }
}

fn read_legacy_file(path: &Path) -> Result<GameAchievementRecord> {
    let content = fs::read_to_string(path)?;
    let file: LegacyGameFile = serde_json::from_str(&content)?;
    Ok(file.into_record())
}

/// Counters of one import run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyImportReport {
    /// Nothing to do: already completed and no files left
    pub skipped: bool,
    pub imported: u32,
    pub parse_failed: u32,
    pub db_write_failed: u32,
    pub deleted: u32,
    pub delete_failed: u32,
    pub quarantined: u32,
    pub remaining: u32,
    pub completed: bool,
}

pub struct LegacyImporter<'a> {
    store: &'a CacheStore,
    legacy_dir: PathBuf,
}

impl<'a> LegacyImporter<'a> {
    pub fn new(store: &'a CacheStore, legacy_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            legacy_dir: legacy_dir.into(),
        }
    }

    pub fn run(&self) -> Result<LegacyImportReport> {
        self.store.ensure_initialized()?;

        let files = list_json_files(&self.legacy_dir)?;
        let already_done =
            self.store.get_metadata(META_LEGACY_COMPLETED)?.as_deref() == Some("true");
        if already_done && files.is_empty() {
            tracing::debug!("Legacy import already completed");
            return Ok(LegacyImportReport {
                skipped: true,
                completed: true,
                ..Default::default()
            });
        }
        if already_done {
            tracing::warn!(
                "Legacy import marked complete but {} files remain; importing again",
                files.len()
            );
            self.store.set_metadata(META_LEGACY_COMPLETED, "false")?;
        }

        let mut report = LegacyImportReport::default();
        for path in files {
            let cache_key = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().trim().to_string())
                .unwrap_or_default();

            let parsed: Result<GameAchievementRecord> = if cache_key.is_empty() {
                Err(ValidationError::EmptyCacheKey.into())
            } else {
                read_legacy_file(&path)
            };
            let record = match parsed {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Could not parse legacy file {}: {}", path.display(), e);
                    report.parse_failed += 1;
                    match self.quarantine(&path) {
                        Ok(_) => report.quarantined += 1,
                        Err(e) => tracing::warn!("Could not quarantine {}: {}", path.display(), e),
                    }
                    continue;
                }
            };

            if let Err(e) = self.store.save_record(&cache_key, &record) {
                tracing::warn!("Could not store legacy record {}: {}", cache_key, e);
                report.db_write_failed += 1;
                continue;
            }
            report.imported += 1;

            match fs::remove_file(&path) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!("Could not delete imported file {}: {}", path.display(), e);
                    report.delete_failed += 1;
                }
            }
        }

        report.remaining = list_json_files(&self.legacy_dir)?.len() as u32;
        report.completed =
            legacy_import_done(report.parse_failed, report.db_write_failed, report.remaining);
        self.record(&report)?;

        tracing::info!(
            "Legacy import: {} imported, {} unparsable, {} failed to store, {} remaining",
            report.imported,
            report.parse_failed,
            report.db_write_failed,
            report.remaining
        );

        if report.completed {
            self.remove_empty_dir();
        }
        Ok(report)
    }

    fn record(&self, report: &LegacyImportReport) -> Result<()> {
        let counters = [
            (META_LEGACY_IMPORTED, report.imported),
            (META_LEGACY_PARSE_FAILED, report.parse_failed),
            (META_LEGACY_DB_WRITE_FAILED, report.db_write_failed),
            (META_LEGACY_DELETED, report.deleted),
            (META_LEGACY_DELETE_FAILED, report.delete_failed),
            (META_LEGACY_QUARANTINED, report.quarantined),
            (META_LEGACY_REMAINING, report.remaining),
        ];
        for (key, value) in counters {
            self.store.set_metadata(key, &value.to_string())?;
        }
        self.store
            .set_metadata(META_LEGACY_LAST_RUN, &Utc::now().to_rfc3339())?;
        if report.completed {
            self.store.set_metadata(META_LEGACY_COMPLETED, "true")?;
        }
        Ok(())
    }

    fn quarantine(&self, path: &Path) -> Result<PathBuf> {
        let dir = self.legacy_dir.join(QUARANTINE_DIR_NAME);
        fs::create_dir_all(&dir)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed.json".to_string());

        let mut target = dir.join(&name);
        if target.exists() {
            target = dir.join(format!("{}.{}", Utc::now().format("%Y%m%dT%H%M%S%.3f"), name));
        }
        fs::rename(path, &target)?;
        Ok(target)
    }

    fn remove_empty_dir(&self) {
        let is_empty = match fs::read_dir(&self.legacy_dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => return,
        };
        if is_empty {
            if let Err(e) = fs::remove_dir(&self.legacy_dir) {
                tracing::warn!(
                    "Could not remove empty legacy directory {}: {}",
                    self.legacy_dir.display(),
                    e
                );
            }
        }
    }
}

/// `*.json` files directly inside `dir`, sorted; empty when `dir` is absent
fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if path.is_file() && is_json {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    const PORTAL: &str = r#"{
        "ProviderName": "Steam",
        "Name": "Portal",
        "AppId": 400,
        "Playtime": 3600,
        "Items": [
            { "ApiName": "PORTAL_1", "DisplayName": "Lab Rat", "DateUnlocked": "2012-05-01T10:00:00Z" },
            { "ApiName": "PORTAL_2", "DisplayName": "Fratricide", "DateUnlocked": "0001-01-01T00:00:00" }
        ]
    }"#;

    fn store(dir: &Path) -> CacheStore {
        CacheStore::new(CacheConfig::for_data_dir(dir))
    }

    #[test]
    fn test_parse_legacy_shape() {
        let file: LegacyGameFile = serde_json::from_str(PORTAL).unwrap();
        let record = file.into_record();
        assert_eq!(record.game_name, "Portal");
        assert_eq!(record.provider_game_id, Some(400));
        assert_eq!(record.total_count(), 2);
        assert_eq!(record.unlocked_count(), 1);
        assert!(record.has_achievements);
    }

    #[test]
    fn test_import_moves_bad_files_aside_and_deletes_good_ones() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let legacy = dir.path().join("achievement_cache");
        fs::create_dir_all(&legacy).unwrap();
        let key = Uuid::new_v4().to_string();
        fs::write(legacy.join(format!("{}.json", key)), PORTAL).unwrap();
        fs::write(legacy.join("broken.json"), "{ not json").unwrap();
        fs::write(legacy.join("notes.txt"), "ignored").unwrap();

        let report = LegacyImporter::new(&store, &legacy).run().unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.parse_failed, 1);
        assert_eq!(report.quarantined, 1);
        assert_eq!(report.remaining, 0);
        assert!(!report.completed);
        assert!(legacy.join(QUARANTINE_DIR_NAME).join("broken.json").is_file());

        let record = store.load_record(&key).unwrap().unwrap();
        assert_eq!(record.unlocked_count(), 1);
        assert_eq!(
            store.get_metadata(META_LEGACY_PARSE_FAILED).unwrap().as_deref(),
            Some("1")
        );
        assert_ne!(
            store.get_metadata(META_LEGACY_COMPLETED).unwrap().as_deref(),
            Some("true")
        );

        // Nothing left to parse: the second run completes
        let again = LegacyImporter::new(&store, &legacy).run().unwrap();
        assert!(again.completed);
        assert_eq!(
            store.get_metadata(META_LEGACY_COMPLETED).unwrap().as_deref(),
            Some("true")
        );
    }

    #[test]
    fn test_completed_import_is_skipped_until_files_reappear() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let legacy = dir.path().join("achievement_cache");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("first.json"), PORTAL).unwrap();

        let first = LegacyImporter::new(&store, &legacy).run().unwrap();
        assert!(first.completed);
        assert!(!legacy.exists());

        let skipped = LegacyImporter::new(&store, &legacy).run().unwrap();
        assert!(skipped.skipped);

        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("second.json"), PORTAL).unwrap();
        let rerun = LegacyImporter::new(&store, &legacy).run().unwrap();
        assert!(!rerun.skipped);
        assert_eq!(rerun.imported, 1);
        assert!(rerun.completed);
    }
}
