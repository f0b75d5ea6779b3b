//! Schema creation and drift reconciliation
//!
//! Drift is detected from the columns and indexes actually present, never
//! from the stored version number. A pass plans every correction first, takes
//! at most one snapshot, applies the plan in a single transaction and then
//! verifies the result.

use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use trophy_cache_core::constants::META_SCHEMA_VERSION;

use super::backup::snapshot_database;
use super::metadata::{get_metadata, set_metadata};
use super::schema::{
    indexes_for, ColumnDef, IndexDef, RenamedColumn, INDEXES, RENAMED_COLUMNS, SCHEMA_VERSION,
    SUPERSEDED_INDEXES, TABLES,
};
use crate::error::{CacheError, Result};

/// Outcome of one `ensure_schema` pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version stored before this pass (0 for a fresh or unversioned file)
    pub previous_version: i64,
    pub current_version: i64,
    /// Human-readable description of every applied correction
    pub applied: Vec<String>,
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug)]
pub enum Correction {
    RenameColumn(&'static RenamedColumn),
    BackfillRenamed(&'static RenamedColumn),
    AddColumn {
        table: &'static str,
        column: &'static ColumnDef,
    },
    DropIndex(&'static str),
    CreateIndex(&'static IndexDef),
}

impl Correction {
    pub fn describe(&self) -> String {
        match self {
            Correction::RenameColumn(r) => {
                format!("rename {}.{} to {}", r.table, r.from, r.to)
            }
            Correction::BackfillRenamed(r) => {
                format!("backfill {}.{} from {}", r.table, r.to, r.from)
            }
            Correction::AddColumn { table, column } => {
                format!("add column {}.{}", table, column.name)
            }
            Correction::DropIndex(name) => format!("drop superseded index {}", name),
            Correction::CreateIndex(idx) => format!("create index {}", idx.name),
        }
    }

    fn apply(&self, conn: &Connection) -> rusqlite::Result<()> {
        match self {
            Correction::RenameColumn(r) => {
                conn.execute(
                    &format!("ALTER TABLE {} RENAME COLUMN {} TO {}", r.table, r.from, r.to),
                    [],
                )?;
            }
            Correction::BackfillRenamed(r) => {
                conn.execute(
                    &format!(
                        "UPDATE {t} SET {to} = {from} WHERE {to} IS NULL AND {from} IS NOT NULL",
                        t = r.table,
                        to = r.to,
                        from = r.from
                    ),
                    [],
                )?;
            }
            Correction::AddColumn { table, column } => {
                if let Some(add_sql) = column.add_sql {
                    conn.execute(
                        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column.name, add_sql),
                        [],
                    )?;
                }
                if let Some(backfill) = column.backfill_sql {
                    conn.execute(backfill, [])?;
                }
            }
            Correction::DropIndex(name) => {
                conn.execute(&format!("DROP INDEX IF EXISTS {}", name), [])?;
            }
            Correction::CreateIndex(idx) => {
                if let Some(prepare) = idx.prepare_sql {
                    let repaired = conn.execute(prepare, [])?;
                    if repaired > 0 {
                        tracing::warn!("Repaired {} rows before creating {}", repaired, idx.name);
                    }
                }
                conn.execute(idx.create_sql, [])?;
            }
        }
        Ok(())
    }
}

/// Whether this pass already copied the database aside
#[derive(Debug, Default)]
enum SnapshotState {
    #[default]
    Pending,
    Taken(PathBuf),
}

impl SnapshotState {
    fn ensure(&mut self, db_path: &Path, backup_root: &Path) -> Result<()> {
        if let SnapshotState::Pending = self {
            *self = SnapshotState::Taken(snapshot_database(db_path, backup_root)?);
        }
        Ok(())
    }

    fn into_path(self) -> Option<PathBuf> {
        match self {
            SnapshotState::Pending => None,
            SnapshotState::Taken(path) => Some(path),
        }
    }
}

pub struct SchemaManager {
    db_path: PathBuf,
    backup_root: PathBuf,
}

impl SchemaManager {
    pub fn new(db_path: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            backup_root: backup_root.into(),
        }
    }

    /// Bring the connection's database to the current schema. Safe to call on
    /// every start; a pass over an up-to-date file changes nothing.
    pub fn ensure_schema(&self, conn: &Connection) -> Result<MigrationReport> {
        apply_pragmas(conn)?;
        create_missing_tables(conn)?;

        let previous_version = read_schema_version(conn);
        if previous_version > SCHEMA_VERSION {
            tracing::warn!(
                "Database schema version {} is newer than {}; reconciling anyway",
                previous_version,
                SCHEMA_VERSION
            );
        }

        let plan = plan_corrections(conn)?;
        let mut snapshot = SnapshotState::default();
        let mut applied = Vec::with_capacity(plan.len());

        // Verification runs before commit so a failed pass leaves the file as it was
        let tx = conn.unchecked_transaction()?;
        if !plan.is_empty() {
            tracing::info!("Schema drift detected: {} corrections planned", plan.len());
            for correction in &plan {
                snapshot.ensure(&self.db_path, &self.backup_root)?;
                tracing::info!("Applying schema correction: {}", correction.describe());
                correction.apply(&tx)?;
                applied.push(correction.describe());
            }
        }

        let problems = verify_schema(&tx)?;
        if !problems.is_empty() {
            tracing::error!("Schema verification failed: {}", problems.join("; "));
            return Err(CacheError::SchemaVerification(problems));
        }

        if previous_version != SCHEMA_VERSION {
            set_metadata(&tx, META_SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
        }
        tx.commit()?;

        Ok(MigrationReport {
            previous_version,
            current_version: SCHEMA_VERSION,
            applied,
            snapshot: snapshot.into_path(),
        })
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    // In-memory databases answer "memory" here
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::debug!("journal_mode stayed {}", mode);
    }
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(())
}

/// Create absent tables, and the indexes of the tables created here.
/// Indexes on pre-existing tables are left to reconciliation.
fn create_missing_tables(conn: &Connection) -> Result<()> {
    for table in TABLES {
        if table_exists(conn, table.name)? {
            continue;
        }
        conn.execute(table.create_sql, [])?;
        for idx in indexes_for(table.name) {
            conn.execute(idx.create_sql, [])?;
        }
    }
    Ok(())
}

fn read_schema_version(conn: &Connection) -> i64 {
    match get_metadata(conn, META_SCHEMA_VERSION) {
        Ok(Some(value)) => value.trim().parse().unwrap_or(0),
        Ok(None) => 0,
        Err(e) => {
            tracing::warn!("Could not read schema version: {}", e);
            0
        }
    }
}

pub fn plan_corrections(conn: &Connection) -> Result<Vec<Correction>> {
    let mut columns: HashMap<&'static str, HashSet<String>> = HashMap::new();
    for table in TABLES {
        columns.insert(table.name, table_columns(conn, table.name)?);
    }

    let mut plan = Vec::new();

    for rename in RENAMED_COLUMNS {
        let Some(present) = columns.get_mut(rename.table) else {
            continue;
        };
        let has_old = present.contains(&rename.from.to_lowercase());
        let has_new = present.contains(&rename.to.to_lowercase());
        if has_old && !has_new {
            plan.push(Correction::RenameColumn(rename));
            present.remove(&rename.from.to_lowercase());
            present.insert(rename.to.to_lowercase());
        } else if has_old && has_new && needs_backfill(conn, rename)? {
            plan.push(Correction::BackfillRenamed(rename));
        }
    }

    for table in TABLES {
        let Some(present) = columns.get_mut(table.name) else {
            continue;
        };
        for column in table.columns {
            if column.add_sql.is_some() && !present.contains(&column.name.to_lowercase()) {
                plan.push(Correction::AddColumn {
                    table: table.name,
                    column,
                });
                present.insert(column.name.to_lowercase());
            }
        }
    }

    let indexes = index_names(conn)?;
    for name in SUPERSEDED_INDEXES {
        if indexes.contains(&name.to_lowercase()) {
            plan.push(Correction::DropIndex(*name));
        }
    }
    for idx in INDEXES {
        if indexes.contains(&idx.name.to_lowercase()) {
            continue;
        }
        let buildable = columns
            .get(idx.table)
            .map(|present| idx.columns.iter().all(|c| present.contains(&c.to_lowercase())))
            .unwrap_or(false);
        if buildable {
            plan.push(Correction::CreateIndex(idx));
        }
    }

    Ok(plan)
}

/// Everything still wrong with the schema; empty when it can be trusted
pub fn verify_schema(conn: &Connection) -> Result<Vec<String>> {
    let mut problems = Vec::new();
    for table in TABLES {
        let present = table_columns(conn, table.name)?;
        if present.is_empty() {
            problems.push(format!("missing table {}", table.name));
            continue;
        }
        for column in table.columns {
            if !present.contains(&column.name.to_lowercase()) {
                problems.push(format!("missing column {}.{}", table.name, column.name));
            }
        }
    }

    let indexes = index_names(conn)?;
    for idx in INDEXES {
        if !indexes.contains(&idx.name.to_lowercase()) {
            problems.push(format!("missing index {}", idx.name));
        }
    }
    for name in SUPERSEDED_INDEXES {
        if indexes.contains(&name.to_lowercase()) {
            problems.push(format!("superseded index {} still present", name));
        }
    }
    Ok(problems)
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

/// Lower-cased column names; empty when the table doesn't exist
fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let names = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
}

fn index_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'index'")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
}

fn needs_backfill(conn: &Connection, rename: &RenamedColumn) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {t} WHERE {to} IS NULL AND {from} IS NOT NULL)",
            t = rename.table,
            to = rename.to,
            from = rename.from
        ),
        [],
        |row| row.get(0),
    )
}
