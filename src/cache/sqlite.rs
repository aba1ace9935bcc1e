//! SQLite-backed cache store shared across processes
//!
//! Values are stored as JSON, zstd-compressed once they reach the configured
//! threshold. Expiry is an absolute unix timestamp in milliseconds.

use super::{CacheError, CacheStore};
use crate::error::{RankmixError, Result};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

type DbPool = Pool<SqliteConnectionManager>;

/// Persistent cache store
#[derive(Clone)]
pub struct SqliteCache {
    pool: DbPool,
    compression_threshold: usize,
}

/// Cache table statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteCacheStats {
    pub entries: usize,
    pub expired_entries: usize,
    pub compressed_entries: usize,
    pub total_size_bytes: u64,
}

impl SqliteCache {
    /// Open (or create) the cache database at `db_path`
    pub fn open(db_path: &Path, compression_threshold: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RankmixError::Io {
                source: e,
                context: format!("Failed to create cache directory: {:?}", parent),
            })?;
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

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| RankmixError::Config(format!("Failed to create connection pool: {}", e)))?;

        let cache = Self {
            pool,
            compression_threshold,
        };
        cache.migrate()?;

        tracing::debug!("Opened SQLite cache at {:?}", db_path);

        Ok(cache)
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| RankmixError::Config(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying cache migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Delete expired rows, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(removed)
    }

    /// Delete every row, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let removed = conn.execute("DELETE FROM cache_entries", [])?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<SqliteCacheStats> {
        let conn = self.get_conn()?;
        let now = now_millis();

        let entries: i64 =
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;

        let expired: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at <= ?1",
            params![now],
            |row| row.get(0),
        )?;

        let compressed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE compressed = 1",
            [],
            |row| row.get(0),
        )?;

        let total_size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;

        Ok(SqliteCacheStats {
            entries: entries as usize,
            expired_entries: expired as usize,
            compressed_entries: compressed as usize,
            total_size_bytes: total_size as u64,
        })
    }

    fn encode(&self, value: &Value) -> std::result::Result<(Vec<u8>, bool), CacheError> {
        let raw = serde_json::to_vec(value)?;
        if raw.len() < self.compression_threshold {
            return Ok((raw, false));
        }

        let compressed = zstd::encode_all(&raw[..], 3)
            .map_err(|e| CacheError::Backend(format!("Failed to compress value: {}", e)))?;
        Ok((compressed, true))
    }

    /// Run a blocking closure on a pooled connection off the async runtime
    async fn with_conn<T, F>(&self, f: F) -> std::result::Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> std::result::Result<T, CacheError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| CacheError::Unavailable(format!("Failed to get connection: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| CacheError::Backend(format!("Cache task failed: {}", e)))?
    }
}

fn decode(blob: &[u8], compressed: bool) -> std::result::Result<Value, CacheError> {
    if compressed {
        let raw = zstd::decode_all(blob)
            .map_err(|e| CacheError::Backend(format!("Failed to decompress value: {}", e)))?;
        Ok(serde_json::from_slice(&raw)?)
    } else {
        Ok(serde_json::from_slice(blob)?)
    }
}

fn lookup(
    conn: &Connection,
    key: &str,
    now: i64,
) -> std::result::Result<Option<Value>, CacheError> {
    let row: Option<(Vec<u8>, bool)> = conn
        .query_row(
            "SELECT value, compressed FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
            params![key, now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(backend_error)?;

    row.map(|(blob, compressed)| decode(&blob, compressed))
        .transpose()
}

fn backend_error(e: rusqlite::Error) -> CacheError {
    CacheError::Backend(e.to_string())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> std::result::Result<Option<Value>, CacheError> {
        let key = key.to_string();
        self.with_conn(move |conn| lookup(conn, &key, now_millis()))
            .await
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> std::result::Result<(), CacheError> {
        let (blob, compressed) = self.encode(&value)?;
        let ttl_ms = i64::try_from(ttl.as_millis())
            .map_err(|_| CacheError::Backend(format!("TTL out of range: {:?}", ttl)))?;
        let key = key.to_string();

        self.with_conn(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO cache_entries (key, value, compressed, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    compressed = excluded.compressed,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at",
                params![key, blob, compressed, now, now.saturating_add(ttl_ms)],
            )
            .map_err(backend_error)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), CacheError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
                .map_err(backend_error)?;
            Ok(())
        })
        .await
    }

    async fn get_many(
        &self,
        keys: &[String],
    ) -> std::result::Result<Vec<Option<Value>>, CacheError> {
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            let now = now_millis();
            keys.iter().map(|key| lookup(conn, key, now)).collect()
        })
        .await
    }
}

/// Cache schema migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: key/value table with absolute expiry
    r#"
    CREATE TABLE cache_entries (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        compressed BOOLEAN NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    );

    CREATE INDEX idx_cache_entries_expires_at ON cache_entries(expires_at);
    "#,
];
