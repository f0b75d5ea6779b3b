//! Configuration management using trophy_cache.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use trophy_cache_core::{Provider, UserIdentity};

use crate::error::Result;

pub const CONFIG_FILE_NAME: &str = "trophy_cache.toml";

/// Saved account for one provider, used when no live session is available
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Steam64 id, RetroAchievements username, PSN name...
    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding the database and its backups (None = platform data dir)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Database file name inside the data directory
    #[serde(default = "default_db_file_name")]
    pub db_file_name: String,

    /// Sub-directory of the data directory receiving pre-migration snapshots
    #[serde(default = "default_backup_dir_name")]
    pub backup_dir_name: String,

    /// Sub-directory of the data directory holding legacy per-game JSON files
    #[serde(default = "default_legacy_dir_name")]
    pub legacy_dir_name: String,

    /// Saved accounts keyed by provider name
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountSettings>,
}

fn default_db_file_name() -> String {
    "achievement_cache.db".to_string()
}

fn default_backup_dir_name() -> String {
    "migration_backups".to_string()
}

fn default_legacy_dir_name() -> String {
    "achievement_cache".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            db_file_name: default_db_file_name(),
            backup_dir_name: default_backup_dir_name(),
            legacy_dir_name: default_legacy_dir_name(),
            accounts: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    /// Default config rooted at an explicit data directory
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    /// Load config from the default location, falling back to defaults
    pub fn load() -> Self {
        let path = default_config_path();
        if path.exists() {
            match Self::load_from(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Error loading {}: {}", path.display(), e);
                }
            }
        }
        Self::default()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "TrophyCache")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(&self.db_file_name)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.data_dir().join(&self.backup_dir_name)
    }

    pub fn legacy_dir(&self) -> PathBuf {
        self.data_dir().join(&self.legacy_dir_name)
    }

    /// Saved identity for a provider, if one is configured
    pub fn saved_identity(&self, provider: Provider) -> Option<UserIdentity> {
        self.accounts
            .iter()
            .find(|(name, _)| Provider::normalize(name) == provider)
            .map(|(_, account)| account)
            .filter(|account| !account.user_id.trim().is_empty())
            .map(|account| UserIdentity {
                external_user_id: account.user_id.trim().to_string(),
                display_name: account.display_name.clone(),
            })
    }

    pub fn set_account(&mut self, provider: Provider, user_id: &str, display_name: Option<&str>) {
        self.accounts.insert(
            provider.as_str().to_string(),
            AccountSettings {
                user_id: user_id.to_string(),
                display_name: display_name.map(String::from),
            },
        );
    }
}

/// Config file path: next to the platform config dir, else the working directory
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "TrophyCache")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}
