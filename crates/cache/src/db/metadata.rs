//! Key/value metadata (schema version, legacy import bookkeeping)

use rusqlite::{params, Connection, OptionalExtension, Result};

pub fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT Value FROM Metadata WHERE Key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO Metadata (Key, Value) VALUES (?1, ?2)
         ON CONFLICT(Key) DO UPDATE SET Value = excluded.Value",
        params![key, value],
    )?;
    Ok(())
}
