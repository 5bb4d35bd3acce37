//! SQLite-backed cursor store.
//!
//! Suited to hosts that already keep a local database. Each cursor is one row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use vitalsync_common::{Category, Error, Result};

use crate::cursor::{CursorStore, SyncCursor};

type RawRow = (String, Option<String>, Option<i64>, Option<i64>, i64, i64);

/// Cursor store using SQLite.
pub struct SqliteCursorStore {
    conn: Mutex<Connection>,
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

impl SqliteCursorStore {
    /// Create or open a cursor database at `db_path`.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(storage_err)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_cursors (
                category TEXT PRIMARY KEY,
                token TEXT,
                last_synced_at INTEGER,
                last_delta_size INTEGER,
                total_syncs INTEGER NOT NULL DEFAULT 0,
                total_records_fetched INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .map_err(storage_err)?;

        info!("Cursor database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("Cursor database lock poisoned".to_string()))
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn into_cursor(raw: RawRow) -> Result<SyncCursor> {
        let (category, token, synced_ms, delta, total_syncs, total_records) = raw;
        let last_synced_at = match synced_ms {
            Some(ms) => Some(DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
                Error::Serialization(format!("Invalid sync timestamp {} for {}", ms, category))
            })?),
            None => None,
        };

        Ok(SyncCursor {
            category: Category::new(category)?,
            token,
            last_synced_at,
            last_delta_size: delta.map(|d| d.max(0) as usize),
            total_syncs: total_syncs.max(0) as u64,
            total_records_fetched: total_records.max(0) as u64,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT category, token, last_synced_at, last_delta_size, \
     total_syncs, total_records_fetched FROM sync_cursors";

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self, category: &Category) -> Result<Option<SyncCursor>> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("{} WHERE category = ?1", SELECT_COLUMNS),
                params![category.as_str()],
                Self::read_row,
            )
            .optional()
            .map_err(storage_err)?
        };
        raw.map(Self::into_cursor).transpose()
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO sync_cursors
                (category, token, last_synced_at, last_delta_size,
                 total_syncs, total_records_fetched)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                cursor.category.as_str(),
                cursor.token,
                cursor.last_synced_at.map(|t| t.timestamp_millis()),
                cursor.last_delta_size.map(|d| d as i64),
                cursor.total_syncs as i64,
                cursor.total_records_fetched as i64,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete(&self, category: &Category) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM sync_cursors WHERE category = ?1",
            params![category.as_str()],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sync_cursors", [])
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncCursor>> {
        let rows: Vec<RawRow> = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(&format!("{} ORDER BY category", SELECT_COLUMNS))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], Self::read_row)
                .map_err(storage_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage_err)?;
            rows
        };
        rows.into_iter().map(Self::into_cursor).collect()
    }
}
