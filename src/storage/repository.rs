use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use super::schema::{self, quote_ident};
use crate::ingest::Table;

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Introspection ──────────────────────────────────────────────────

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map(params![table], |row| row.get(0))?;
    rows.collect()
}

pub fn list_tables(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )
}

/// Rows with a non-null, non-blank value in `column`.
pub fn count_populated(conn: &Connection, table: &str, column: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {c} IS NOT NULL AND TRIM(CAST({c} AS TEXT)) <> ''",
            quote_ident(table),
            c = quote_ident(column)
        ),
        [],
        |row| row.get(0),
    )
}

// ── Uploads ────────────────────────────────────────────────────────

/// Drop and recreate `name` from a staged table, then record its grants.
/// Runs in one transaction. Returns the number of rows loaded.
pub fn replace_table(
    conn: &mut Connection,
    name: &str,
    table: &Table,
    grantees: &[String],
) -> Result<usize, rusqlite::Error> {
    let types = table.infer_types();
    let tx = conn.transaction()?;
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))?;
    tx.execute_batch(&schema::create_table_sql(name, table))?;
    {
        let placeholders: Vec<String> = (1..=table.columns.len()).map(|i| format!("?{i}")).collect();
        let columns: Vec<String> = table.columns.iter().map(|c| quote_ident(c)).collect();
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(name),
            columns.join(", "),
            placeholders.join(", ")
        ))?;
        for row in &table.rows {
            let values = row
                .iter()
                .zip(&types)
                .map(|(v, t)| schema::typed_value(v.as_deref(), *t));
            stmt.execute(params_from_iter(values))?;
        }
    }
    tx.execute("DELETE FROM table_grants WHERE table_name = ?1", params![name])?;
    for grantee in grantees {
        tx.execute(
            "INSERT OR REPLACE INTO table_grants (table_name, grantee, granted_at)
             VALUES (?1, ?2, datetime('now'))",
            params![name, grantee],
        )?;
    }
    tx.commit()?;
    Ok(table.len())
}

pub fn list_grants(conn: &Connection, table: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT grantee FROM table_grants WHERE table_name = ?1 ORDER BY grantee")?;
    let rows = stmt.query_map(params![table], |row| row.get(0))?;
    rows.collect()
}

/// A send-list table loaded into the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub table_name: String,
    pub campaign_name: String,
    pub object_uri: String,
    pub row_count: i64,
    pub resolution: Option<String>,
    pub uploaded_at: String,
}

pub fn record_upload(
    conn: &Connection,
    table: &str,
    campaign_name: &str,
    object_uri: &str,
    row_count: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO campaign_uploads
           (table_name, campaign_name, object_uri, row_count, resolution, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, NULL, datetime('now'))",
        params![table, campaign_name, object_uri, row_count],
    )?;
    Ok(())
}

pub fn set_upload_resolution(
    conn: &Connection,
    table: &str,
    resolution: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE campaign_uploads SET resolution = ?2 WHERE table_name = ?1",
        params![table, resolution],
    )?;
    Ok(())
}

pub fn list_uploads(conn: &Connection) -> Result<Vec<UploadRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT table_name, campaign_name, object_uri, row_count, resolution, uploaded_at
         FROM campaign_uploads ORDER BY uploaded_at DESC, table_name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(UploadRecord {
            table_name: row.get(0)?,
            campaign_name: row.get(1)?,
            object_uri: row.get(2)?,
            row_count: row.get(3)?,
            resolution: row.get(4)?,
            uploaded_at: row.get(5)?,
        })
    })?;
    rows.collect()
}
