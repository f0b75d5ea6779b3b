//! Side-effect free rules shared by the store and the legacy importer

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Ids of stored definitions whose api name no longer appears in the incoming
/// payload. Names compare case-insensitively; the result is sorted.
pub fn stale_definition_ids(
    existing: &HashMap<String, i64>,
    desired: &HashSet<String>,
) -> Vec<i64> {
    let desired: HashSet<String> = desired.iter().map(|name| name.to_lowercase()).collect();

    let mut stale: Vec<i64> = existing
        .iter()
        .filter(|(name, _)| !desired.contains(&name.to_lowercase()))
        .map(|(_, id)| *id)
        .collect();
    stale.sort_unstable();
    stale.dedup();
    stale
}

/// The one-shot legacy import may be marked complete only when nothing failed
/// and nothing is left on disk.
pub fn legacy_import_done(parse_failed: u32, db_write_failed: u32, remaining: u32) -> bool {
    parse_failed == 0 && db_write_failed == 0 && remaining == 0
}

/// Whether to retry a row lookup with the secondary key.
pub fn should_use_fallback_lookup(primary_match: Option<i64>, fallback_usable: bool) -> bool {
    primary_match.is_none() && fallback_usable
}

/// Completion state from provider flag, unlock counts and the optional marker.
///
/// `marker` is `Some(unlocked)` when a completion marker is chosen and found.
/// A locked marker always means "not completed"; otherwise any positive
/// signal completes the game.
pub fn is_game_completed(
    provider_completed: bool,
    unlocked: usize,
    total: usize,
    marker: Option<bool>,
) -> bool {
    if marker == Some(false) {
        return false;
    }
    let all_unlocked = total > 0 && unlocked >= total;
    provider_completed || all_unlocked || marker == Some(true)
}

/// Providers report "never unlocked" as a zero timestamp (Unix epoch or the
/// year-1 default), never as a real unlock.
pub fn is_unlock_sentinel(time: &DateTime<Utc>) -> bool {
    time.timestamp() <= 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stale_definition_ids() {
        let existing: HashMap<String, i64> = [("a", 1), ("b", 2), ("c", 3)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let desired: HashSet<String> = ["a", "c"].into_iter().map(String::from).collect();

        assert_eq!(stale_definition_ids(&existing, &desired), vec![2]);
    }

    #[test]
    fn test_stale_definition_ids_case_insensitive() {
        let existing: HashMap<String, i64> = [("ACH_ONE", 7), ("ach_two", 8)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let desired: HashSet<String> = ["ach_one", "ACH_TWO"].into_iter().map(String::from).collect();
        assert!(stale_definition_ids(&existing, &desired).is_empty());

        let nothing = HashSet::new();
        assert_eq!(stale_definition_ids(&existing, &nothing), vec![7, 8]);
    }

    #[test]
    fn test_legacy_import_done() {
        assert!(legacy_import_done(0, 0, 0));
        assert!(!legacy_import_done(1, 0, 0));
        assert!(!legacy_import_done(0, 1, 0));
        assert!(!legacy_import_done(0, 0, 1));
    }

    #[test]
    fn test_should_use_fallback_lookup() {
        assert!(should_use_fallback_lookup(None, true));
        assert!(!should_use_fallback_lookup(None, false));
        assert!(!should_use_fallback_lookup(Some(3), true));
    }

    #[test]
    fn test_is_game_completed() {
        // Locked marker overrides everything
        assert!(!is_game_completed(true, 10, 10, Some(false)));
        assert!(is_game_completed(false, 1, 10, Some(true)));
        assert!(is_game_completed(true, 0, 10, None));
        assert!(is_game_completed(false, 10, 10, None));
        assert!(!is_game_completed(false, 9, 10, None));
        assert!(!is_game_completed(false, 0, 0, None));
    }

    #[test]
    fn test_is_unlock_sentinel() {
        assert!(is_unlock_sentinel(&Utc.timestamp_opt(0, 0).unwrap()));
        assert!(is_unlock_sentinel(&Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap()));
        assert!(!is_unlock_sentinel(&Utc.timestamp_opt(1, 0).unwrap()));
    }
}
