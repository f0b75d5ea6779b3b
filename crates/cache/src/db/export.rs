//! Read-only CSV dump of the cache

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::schema::TABLES;
use crate::error::Result;

const SUMMARY_SQL: &str = "SELECT u.ProviderName AS Provider, u.ExternalUserId AS ExternalUserId,
        g.Name AS Game, p.CacheKey AS CacheKey, d.ApiName AS ApiName,
        ua.IsUnlocked AS IsUnlocked, ua.UnlockTimeUtc AS UnlockTimeUtc,
        p.UnlockedCount AS UnlockedCount, p.TotalCount AS TotalCount,
        p.IsCompleted AS IsCompleted
    FROM UserGameProgress p
    JOIN Users u ON u.Id = p.UserId
    JOIN Games g ON g.Id = p.GameId
    LEFT JOIN UserAchievements ua ON ua.UserGameProgressId = p.Id
    LEFT JOIN AchievementDefinitions d ON d.Id = ua.AchievementDefinitionId
    ORDER BY u.ProviderName, g.Name, p.Id, d.Id";

/// Write `<Table>.csv` for every table plus `Summary.csv`; returns the files
pub fn export_tables(conn: &Connection, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(TABLES.len() + 1);

    for table in TABLES {
        let path = dir.join(format!("{}.csv", table.name));
        write_query(conn, &format!("SELECT * FROM {} ORDER BY 1", table.name), &path)?;
        written.push(path);
    }

    let summary = dir.join("Summary.csv");
    write_query(conn, SUMMARY_SQL, &summary)?;
    written.push(summary);

    tracing::info!("Exported {} files to {}", written.len(), dir.display());
    Ok(written)
}

fn write_query(conn: &Connection, sql: &str, path: &Path) -> Result<()> {
    let mut stmt = conn.prepare(sql)?;
    let header: Vec<String> = stmt.column_names().iter().map(|name| name.to_string()).collect();
    let column_count = header.len();

    let mut out = BufWriter::new(File::create(path)?);
    write_line(&mut out, header.iter().map(String::as_str))?;

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut fields = Vec::with_capacity(column_count);
        for i in 0..column_count {
            fields.push(field_text(row.get_ref(i)?));
        }
        write_line(&mut out, fields.iter().map(String::as_str))?;
    }
    out.flush()?;
    Ok(())
}

fn field_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Blob(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

fn write_line<'a>(out: &mut impl Write, fields: impl Iterator<Item = &'a str>) -> std::io::Result<()> {
    let line: Vec<String> = fields.map(quote_field).collect();
    write!(out, "{}\r\n", line.join(","))
}

/// RFC 4180: quote fields holding separators, quotes or line breaks
fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
