//! trophy-cache maintenance tool
//!
//! Usage: trophy-cache [--config <path>] <command>
//!
//! Commands:
//! - keys: cache keys of the current users
//! - status: schema version and the last migration pass
//! - backups: pre-migration snapshots
//! - export <dir>: CSV dump of every table
//! - import-legacy [dir]: import old per-game JSON files
//! - clear: drop every cached game
//! - remove <library id>: forget one game
//! - meta get <key> / meta set <key> <value>

use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trophy_cache::db::backup::list_snapshots;
use trophy_cache::{CacheConfig, CacheStore, LegacyImporter, Result};

const USAGE: &str = "usage: trophy-cache [--config <path>] \
    <keys|status|backups|export <dir>|import-legacy [dir]|clear|remove <id>|meta get <k>|meta set <k> <v>>";

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "trophy_cache=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = std::env::var("TROPHY_CACHE_CONFIG").ok().map(PathBuf::from);
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
        config_path = Some(PathBuf::from(args[1].clone()));
        args.drain(..2);
    }

    let config = match config_path {
        Some(path) => match CacheConfig::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => CacheConfig::load(),
    };

    let store = CacheStore::new(config);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match run(&store, &args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("{}", USAGE);
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns Ok(false) when the arguments don't name a command
fn run(store: &CacheStore, args: &[&str]) -> Result<bool> {
    match args {
        ["keys"] => {
            let mut keys: Vec<String> = store.list_cached_keys_for_current_users()?.into_iter().collect();
            keys.sort();
            for key in keys {
                println!("{}", key);
            }
        }
        ["status"] => {
            let report = store.migration_report()?;
            println!("schema version: {} (was {})", report.current_version, report.previous_version);
            for correction in &report.applied {
                println!("applied: {}", correction);
            }
            if let Some(snapshot) = report.snapshot {
                println!("snapshot: {}", snapshot.display());
            }
            println!("has current-user rows: {}", store.has_any_current_user_rows()?);
        }
        ["backups"] => {
            for dir in list_snapshots(&store.config().backup_root())? {
                println!("{}", dir.display());
            }
        }
        ["export", dir] => {
            for file in store.export_to_dir(&PathBuf::from(dir))? {
                println!("{}", file.display());
            }
        }
        ["import-legacy"] => {
            let report = LegacyImporter::new(store, store.config().legacy_dir()).run()?;
            println!("{:#?}", report);
        }
        ["import-legacy", dir] => {
            let report = LegacyImporter::new(store, PathBuf::from(dir)).run()?;
            println!("{:#?}", report);
        }
        ["clear"] => store.clear_all()?,
        ["remove", id] => {
            let removed = store.remove_game(id)?;
            println!("removed {} rows", removed);
        }
        ["meta", "get", key] => match store.get_metadata(key)? {
            Some(value) => println!("{}", value),
            None => println!("(unset)"),
        },
        ["meta", "set", key, value] => store.set_metadata(key, value)?,
        _ => return Ok(false),
    }
    Ok(true)
}
