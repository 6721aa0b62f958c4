//! Durable profile cache shared by every feed session of the process.
//!
//! Records older than the configured TTL are invisible to `get`/`get_all`
//! and removed by `delete_expired`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::CacheError;
use crate::models::{now_secs, ProfileRecord};

#[async_trait]
pub trait ProfileCache: Send + Sync {
    async fn get(&self, author_id: &str) -> Result<Option<ProfileRecord>, CacheError>;

    async fn get_all(&self) -> Result<Vec<ProfileRecord>, CacheError>;

    /// Upsert keyed by `author_id`. `is_loading` is never stored.
    async fn put(&self, record: &ProfileRecord) -> Result<(), CacheError>;

    /// Remove expired records, returning how many were deleted
    async fn delete_expired(&self) -> Result<usize, CacheError>;
}

pub struct SqliteProfileCache {
    conn: Arc<Mutex<Connection>>,
    ttl_secs: u64,
}

impl SqliteProfileCache {
    pub fn open<P: AsRef<Path>>(path: P, ttl_secs: u64) -> Result<Self, CacheError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?, ttl_secs)
    }

    pub fn in_memory(ttl_secs: u64) -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?, ttl_secs)
    }

    fn with_connection(conn: Connection, ttl_secs: u64) -> Result<Self, CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                author_id TEXT PRIMARY KEY,
                name TEXT,
                display_name TEXT,
                picture_url TEXT,
                fetched_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS profiles_fetched_at ON profiles (fetched_at);
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl_secs,
        })
    }

    fn horizon(&self) -> i64 {
        now_secs().saturating_sub(self.ttl_secs) as i64
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| CacheError::Lock {
                resource: "profile cache".to_string(),
            })?;
            f(&*guard)
        })
        .await?
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileRecord> {
    let fetched_at: i64 = row.get(4)?;
    Ok(ProfileRecord {
        author_id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        picture_url: row.get(3)?,
        fetched_at: fetched_at.max(0) as u64,
        is_loading: false,
    })
}

#[async_trait]
impl ProfileCache for SqliteProfileCache {
    async fn get(&self, author_id: &str) -> Result<Option<ProfileRecord>, CacheError> {
        let author_id = author_id.to_string();
        let horizon = self.horizon();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    "SELECT author_id, name, display_name, picture_url, fetched_at
                     FROM profiles WHERE author_id = ?1 AND fetched_at >= ?2",
                    params![author_id, horizon],
                    record_from_row,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<ProfileRecord>, CacheError> {
        let horizon = self.horizon();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT author_id, name, display_name, picture_url, fetched_at
                 FROM profiles WHERE fetched_at >= ?1",
            )?;
            let records = stmt
                .query_map(params![horizon], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn put(&self, record: &ProfileRecord) -> Result<(), CacheError> {
        let record = record.settled();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO profiles (author_id, name, display_name, picture_url, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(author_id) DO UPDATE SET
                    name = excluded.name,
                    display_name = excluded.display_name,
                    picture_url = excluded.picture_url,
                    fetched_at = excluded.fetched_at",
                params![
                    record.author_id,
                    record.name,
                    record.display_name,
                    record.picture_url,
                    record.fetched_at as i64
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_expired(&self) -> Result<usize, CacheError> {
        let horizon = self.horizon();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM profiles WHERE fetched_at < ?1",
                params![horizon],
            )?;
            Ok(deleted)
        })
        .await
    }
}
