//! SQLite-backed shared cache tier
//!
//! Every process pointing at the same file shares entries. Values at or
//! above the compression threshold are stored zstd-compressed.

use crate::cache::{CacheError, Clock, SharedStore};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

pub struct SqliteStore {
    pool: DbPool,
    compression_threshold: usize,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) the cache database at `db_path`
    pub fn open(
        db_path: &Path,
        compression_threshold: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(8).build(manager)?;

        let store = Self {
            pool,
            compression_threshold,
            clock,
        };
        store.migrate()?;

        tracing::debug!("Opened shared cache at {}", db_path.display());
        Ok(store)
    }

    fn migrate(&self) -> Result<(), CacheError> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0,
                inserted_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
            ",
        )?;
        Ok(())
    }

    /// Delete rows whose TTL has passed, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let pool = self.pool.clone();
        let now = self.clock.now_millis();
        blocking(move || {
            let conn = pool.get()?;
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE expires_at <= ?1",
                params![now],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Number of rows currently stored, expired or not
    pub async fn entry_count(&self) -> Result<u64, CacheError> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = pool.get()?;
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

#[async_trait]
impl SharedStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let now = self.clock.now_millis();

        blocking(move || {
            let conn = pool.get()?;
            let row = conn
                .query_row(
                    "SELECT value, compressed FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                    params![key, now],
                    |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, bool>(1)?)),
                )
                .optional()?;

            match row {
                Some((data, true)) => Ok(Some(zstd::decode_all(&data[..])?)),
                Some((data, false)) => Ok(Some(data)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let threshold = self.compression_threshold;
        let inserted_at = self.clock.now_millis();
        let expires_at = inserted_at + ttl.as_millis() as i64;

        blocking(move || {
            let (data, compressed) = if value.len() >= threshold {
                (zstd::encode_all(&value[..], 3)?, true)
            } else {
                (value, false)
            };

            let conn = pool.get()?;
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries (key, value, compressed, inserted_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key, data, compressed, inserted_at, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let pool = self.pool.clone();
        let key = key.to_string();
        blocking(move || {
            let conn = pool.get()?;
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}

/// Run SQLite and compression work off the async worker threads
async fn blocking<T, F>(work: F) -> Result<T, CacheError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
}
