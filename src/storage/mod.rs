pub mod loader;
pub mod repository;
pub mod resolve;
pub mod schema;

use rusqlite::types::ValueRef;
use rusqlite_migration::{Migrations, M};

use crate::error::{Error, Result};
use crate::query::{GeneratedQuery, SourceCatalog, SqlValue};
use crate::report::{Cell, ResultSet};

pub use repository::UploadRecord;
pub use resolve::Resolution;

/// Warehouse wraps two `tokio_rusqlite::Connection` instances (writer + reader)
/// using WAL mode for concurrent access. The writer serializes loads and
/// identifier resolution; campaign queries run on the reader.
#[derive(Clone)]
pub struct Warehouse {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

impl Warehouse {
    /// Open the warehouse at the default path (`~/.campaigndw/campaigndw.db`).
    pub async fn open() -> Result<Self> {
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
            .join(".campaigndw");
        std::fs::create_dir_all(&dir).map_err(|e| Error::Config(e.to_string()))?;
        Self::open_at(dir.join("campaigndw.db")).await
    }

    /// Open the warehouse at the given path.
    pub async fn open_at(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_writer(&writer).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_reader(&reader).await?;

        Ok(Self { writer, reader })
    }

    /// Open an in-memory warehouse (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init_writer(&writer).await?;

        // In-memory databases are per-connection, so reads share the writer.
        Ok(Self {
            reader: writer.clone(),
            writer,
        })
    }

    async fn init_writer(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )
            .map_err(|e| e.to_string())?;
            let migrations =
                Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))]);
            migrations.to_latest(conn).map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        })
        .await
        .map_err(|e| Error::Migration(e.to_string()))
    }

    async fn init_reader(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
        Ok(())
    }

    /// Get a reference to the writer connection.
    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    /// Get a reference to the reader connection.
    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }

    /// Run a read-only statement and collect every row.
    pub async fn query(&self, sql: String, params: Vec<SqlValue>) -> Result<ResultSet> {
        let rs = self
            .reader
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|c| c.to_lowercase()).collect();
                let width = columns.len();
                let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut cells = Vec::with_capacity(width);
                    for i in 0..width {
                        cells.push(cell_from(row.get_ref(i)?));
                    }
                    out.push(cells);
                }
                Ok::<ResultSet, rusqlite::Error>(ResultSet { columns, rows: out })
            })
            .await?;
        Ok(rs)
    }

    /// Execute an assembled campaign query.
    pub async fn run_query(&self, query: &GeneratedQuery) -> Result<ResultSet> {
        log::debug!("Running query with {} CTEs", query.ctes.len());
        let rs = self.query(query.sql(), query.params.clone()).await?;
        log::info!("Query returned {} rows", rs.rows.len());
        Ok(rs)
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let table = table.to_string();
        let exists = self
            .reader
            .call(move |conn| repository::table_exists(conn, &table))
            .await?;
        Ok(exists)
    }

    pub async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let table = table.to_string();
        let columns = self
            .reader
            .call(move |conn| repository::table_columns(conn, &table))
            .await?;
        Ok(columns)
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let table = table.to_string();
        let n = self
            .reader
            .call(move |conn| repository::count_rows(conn, &table))
            .await?;
        Ok(n)
    }

    /// Introspect the fact tables actually present, for pre-flight checks.
    pub async fn source_catalog(&self) -> Result<SourceCatalog> {
        let tables = self
            .reader
            .call(|conn| {
                let mut out = Vec::new();
                for table in repository::list_tables(conn)? {
                    if schema::is_fact_table(&table) {
                        let columns = repository::table_columns(conn, &table)?;
                        out.push((table, columns));
                    }
                }
                Ok::<_, rusqlite::Error>(out)
            })
            .await?;
        let mut catalog = SourceCatalog::default();
        for (table, columns) in tables {
            for column in columns {
                catalog.add(&table, &column);
            }
        }
        Ok(catalog)
    }

    // ── Config ─────────────────────────────────────────────────────

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .reader
            .call(move |conn| repository::get_config(conn, &key))
            .await?;
        Ok(value)
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.writer
            .call(move |conn| repository::set_config(conn, &key, &value))
            .await?;
        Ok(())
    }

    pub async fn list_config(&self) -> Result<Vec<(String, String)>> {
        let entries = self.reader.call(|conn| repository::list_config(conn)).await?;
        Ok(entries)
    }

    // ── Uploads ────────────────────────────────────────────────────

    pub async fn list_uploads(&self) -> Result<Vec<UploadRecord>> {
        let uploads = self.reader.call(|conn| repository::list_uploads(conn)).await?;
        Ok(uploads)
    }

    pub async fn list_grants(&self, table: &str) -> Result<Vec<String>> {
        let table = table.to_string();
        let grants = self
            .reader
            .call(move |conn| repository::list_grants(conn, &table))
            .await?;
        Ok(grants)
    }

    /// Ensure `table` has a fully usable `user_id` column, enriching from the
    /// user directory when needed. The outcome is recorded on the upload.
    pub async fn resolve_identifiers(&self, table: &str) -> Result<Resolution> {
        let name = table.to_string();
        let attempt = self
            .writer
            .call(move |conn| {
                let attempt = resolve::resolve(conn, &name)?;
                if let resolve::Attempt::Resolved(resolution) = &attempt {
                    repository::set_upload_resolution(conn, &name, &resolution.describe())?;
                }
                Ok::<_, rusqlite::Error>(attempt)
            })
            .await?;
        match attempt {
            resolve::Attempt::Resolved(resolution) => {
                log::info!("{table}: {}", resolution.describe());
                Ok(resolution)
            }
            resolve::Attempt::Unresolvable(message) => {
                log::error!("{table}: {message}");
                Err(Error::IdentifierResolution {
                    table: table.to_string(),
                    message,
                })
            }
        }
    }

    pub async fn is_resolved(&self, table: &str) -> Result<bool> {
        let table = table.to_string();
        let resolved = self
            .reader
            .call(move |conn| resolve::is_resolved(conn, &table))
            .await?;
        Ok(resolved)
    }
}

fn cell_from(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(i) => Cell::Int(i),
        ValueRef::Real(f) => Cell::Float(f),
        ValueRef::Text(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Cell::Text(String::from_utf8_lossy(b).into_owned()),
    }
}
