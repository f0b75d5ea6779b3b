//! Pre-migration snapshots of the database file and its WAL side files

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

const SIDE_SUFFIXES: [&str; 3] = ["", "-wal", "-shm"];

/// Copy `db_path` (plus `-wal`/`-shm` when present) into a fresh
/// `<backup_root>/<UTC timestamp>/` directory and return that directory.
pub fn snapshot_database(db_path: &Path, backup_root: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    let mut dir = backup_root.join(&stamp);
    let mut attempt = 1;
    while dir.exists() {
        dir = backup_root.join(format!("{}-{}", stamp, attempt));
        attempt += 1;
    }
    fs::create_dir_all(&dir)?;

    for suffix in SIDE_SUFFIXES {
        let source = side_file(db_path, suffix);
        if !source.is_file() {
            continue;
        }
        if let Some(name) = source.file_name() {
            fs::copy(&source, dir.join(name))?;
        }
    }

    tracing::info!("Snapshotted {} into {}", db_path.display(), dir.display());
    Ok(dir)
}

/// Snapshot directories under `backup_root`, oldest first
pub fn list_snapshots(backup_root: &Path) -> Result<Vec<PathBuf>> {
    if !backup_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(backup_root)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn side_file(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
