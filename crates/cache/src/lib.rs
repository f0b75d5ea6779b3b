//! Local achievement cache backed by SQLite
//!
//! - config: trophy_cache.toml settings and saved accounts
//! - identity: who the acting user is for a provider
//! - db: schema management and the cache store
//! - legacy: importer for the old per-game JSON files

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod legacy;

pub use config::CacheConfig;
pub use db::{CacheStore, MigrationReport, SaveSummary, SchemaManager, SyncCounts};
pub use error::{CacheError, Result};
pub use identity::{IdentityResolver, SessionIdentities};
pub use legacy::{LegacyImportReport, LegacyImporter};
