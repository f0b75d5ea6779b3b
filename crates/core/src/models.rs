//! Data models shared between the cache store and its callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::constants::UNKNOWN_PROVIDER;
use crate::decisions::is_unlock_sentinel;

/// Source of achievement truth for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    Steam,
    RetroAchievements,
    #[serde(rename = "RPCS3")]
    Rpcs3,
    Manual,
    Unknown,
}

impl Provider {
    /// Every provider with a stable name, in display order
    pub const KNOWN: [Provider; 4] = [
        Provider::Steam,
        Provider::RetroAchievements,
        Provider::Rpcs3,
        Provider::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Steam => "Steam",
            Provider::RetroAchievements => "RetroAchievements",
            Provider::Rpcs3 => "RPCS3",
            Provider::Manual => "Manual",
            Provider::Unknown => UNKNOWN_PROVIDER,
        }
    }

    /// Map a free-form provider name onto a canonical provider.
    ///
    /// Exact (case-insensitive) names win; otherwise a substring guess is made,
    /// and anything unrecognised becomes [`Provider::Unknown`].
    pub fn normalize(raw: &str) -> Provider {
        let trimmed = raw.trim();
        if let Some(exact) = Self::KNOWN
            .iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(trimmed))
        {
            return *exact;
        }

        let lower = trimmed.to_ascii_lowercase();
        if lower.is_empty() {
            Provider::Unknown
        } else if lower.contains("retro") || lower == "ra" {
            Provider::RetroAchievements
        } else if lower.contains("steam") {
            Provider::Steam
        } else if lower.contains("rpcs3")
            || lower.contains("trophy")
            || lower.contains("playstation")
            || lower.contains("ps3")
        {
            Provider::Rpcs3
        } else if lower.contains("manual") {
            Provider::Manual
        } else {
            Provider::Unknown
        }
    }

    /// RetroAchievements hands out the same numeric id to distinct catalog
    /// entries, so its game ids can't identify a row on their own.
    pub fn reuses_game_ids(&self) -> bool {
        matches!(self, Provider::RetroAchievements)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who the cached progress belongs to on one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub external_user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserIdentity {
    pub fn new(external_user_id: impl Into<String>) -> Self {
        Self {
            external_user_id: external_user_id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// One achievement with the current user's unlock state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AchievementDetail {
    pub api_name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub unlocked_icon_path: Option<String>,
    #[serde(default)]
    pub locked_icon_path: Option<String>,
    #[serde(default)]
    pub points: Option<i32>,
    #[serde(default)]
    pub category: Option<String>,
    /// bronze / silver / gold / platinum for trophy-style providers
    #[serde(default)]
    pub trophy_type: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    /// Eligible to be picked as the game's completion marker
    #[serde(default)]
    pub is_capstone: bool,
    /// Rarity, 0-100
    #[serde(default)]
    pub global_percent_unlocked: Option<f64>,
    /// Absent, or at/before the Unix epoch, means locked
    #[serde(default)]
    pub unlock_time_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress_num: Option<i32>,
    #[serde(default)]
    pub progress_denom: Option<i32>,
}

impl AchievementDetail {
    pub fn new(api_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            api_name: api_name.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Unlock time with the zero/epoch sentinel folded into "locked"
    pub fn effective_unlock_time(&self) -> Option<DateTime<Utc>> {
        self.unlock_time_utc.filter(|t| !is_unlock_sentinel(t))
    }

    pub fn is_unlocked(&self) -> bool {
        self.effective_unlock_time().is_some()
    }
}

/// Normalized achievement state of one game for the acting user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameAchievementRecord {
    pub provider_name: String,
    pub game_name: String,
    #[serde(default)]
    pub library_source_name: Option<String>,
    /// Id of the title in the host game library
    #[serde(default)]
    pub external_library_id: Option<Uuid>,
    #[serde(default)]
    pub provider_game_id: Option<i64>,
    #[serde(default)]
    pub playtime_seconds: u64,
    #[serde(default)]
    pub has_achievements: bool,
    #[serde(default)]
    pub excluded_by_user: bool,
    #[serde(default)]
    pub provider_completed: bool,
    /// Api name of the user-chosen completion marker
    #[serde(default)]
    pub completion_marker: Option<String>,
    pub last_updated_utc: DateTime<Utc>,
    #[serde(default)]
    pub achievements: Vec<AchievementDetail>,
}

impl GameAchievementRecord {
    pub fn new(provider_name: impl Into<String>, game_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            game_name: game_name.into(),
            library_source_name: None,
            external_library_id: None,
            provider_game_id: None,
            playtime_seconds: 0,
            has_achievements: false,
            excluded_by_user: false,
            provider_completed: false,
            completion_marker: None,
            last_updated_utc: Utc::now(),
            achievements: Vec::new(),
        }
    }

    pub fn provider(&self) -> Provider {
        Provider::normalize(&self.provider_name)
    }

    /// Achievements with blank api names dropped and case-insensitive
    /// duplicates collapsed onto their first occurrence. Counts, completion
    /// and persistence all work from this list.
    pub fn distinct_achievements(&self) -> Vec<&AchievementDetail> {
        let mut seen = HashSet::with_capacity(self.achievements.len());
        self.achievements
            .iter()
            .filter(|a| {
                let name = a.api_name.trim();
                !name.is_empty() && seen.insert(name.to_lowercase())
            })
            .collect()
    }

    pub fn unlocked_count(&self) -> usize {
        self.distinct_achievements()
            .iter()
            .filter(|a| a.is_unlocked())
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.distinct_achievements().len()
    }

    /// Trimmed completion marker api name, if one is set
    pub fn completion_marker_name(&self) -> Option<&str> {
        self.completion_marker
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    /// Unlock state of the completion marker, if one is set and present
    pub fn marker_state(&self) -> Option<bool> {
        let marker = self.completion_marker_name()?;
        self.distinct_achievements()
            .into_iter()
            .find(|a| a.api_name.trim().eq_ignore_ascii_case(marker))
            .map(|a| a.is_unlocked())
    }

    pub fn is_completed(&self) -> bool {
        let distinct = self.distinct_achievements();
        let unlocked = distinct.iter().filter(|a| a.is_unlocked()).count();
        crate::decisions::is_game_completed(
            self.provider_completed,
            unlocked,
            distinct.len(),
            self.marker_state(),
        )
    }
}
