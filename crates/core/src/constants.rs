//! Shared constants

/// External user id used when neither the live session nor saved settings
/// know who is playing
pub const LEGACY_USER_ID: &str = "legacy";

/// Canonical name stored for payloads whose provider can't be recognised
pub const UNKNOWN_PROVIDER: &str = "Unknown";

/// Metadata key holding the on-disk schema version
pub const META_SCHEMA_VERSION: &str = "schema_version";

// Legacy JSON import bookkeeping
pub const META_LEGACY_COMPLETED: &str = "legacy_import_completed";
pub const META_LEGACY_LAST_RUN: &str = "legacy_import_last_run_utc";
pub const META_LEGACY_IMPORTED: &str = "legacy_import_imported";
pub const META_LEGACY_PARSE_FAILED: &str = "legacy_import_parse_failed";
pub const META_LEGACY_DB_WRITE_FAILED: &str = "legacy_import_db_write_failed";
pub const META_LEGACY_DELETED: &str = "legacy_import_deleted";
pub const META_LEGACY_DELETE_FAILED: &str = "legacy_import_delete_failed";
pub const META_LEGACY_QUARANTINED: &str = "legacy_import_quarantined";
pub const META_LEGACY_REMAINING: &str = "legacy_import_remaining";
