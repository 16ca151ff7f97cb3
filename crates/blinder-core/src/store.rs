//! Durable key-value store over SQLite.
//!
//! Each store owns one directory containing a single database file with a
//! `kv` table. Values are JSON. All access goes through `tokio-rusqlite`, so
//! every get/put/delete is an await point and never blocks the runtime.

use rusqlite::OptionalExtension;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_rusqlite::Connection;

const DB_FILE: &str = "store.sqlite3";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("corrupt value for key {key}: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Typed key-value store. Keys are strings, values are `V` stored as JSON.
pub struct KvStore<V> {
    dir: PathBuf,
    conn: Connection,
    _value: PhantomData<fn() -> V>,
}

impl<V> KvStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Open (creating if needed) the store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let conn = Connection::open(dir.join(DB_FILE)).await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        tracing::debug!(dir = %dir.display(), "kv store opened");
        Ok(Self {
            dir,
            conn,
            _value: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Insert or overwrite `key`.
    pub async fn put(&self, key: &str, value: &V) -> Result<(), StoreError> {
        let key = key.to_string();
        let json = serde_json::to_string(value)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                    (&key, &json),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert `key` only if absent. Returns whether a row was written.
    pub async fn put_if_absent(&self, key: &str, value: &V) -> Result<bool, StoreError> {
        let key = key.to_string();
        let json = serde_json::to_string(value)?;
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
                    (&key, &json),
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    /// Fetch `key`. A missing key is `Ok(None)`.
    pub async fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        let owned = key.to_string();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row("SELECT value FROM kv WHERE key = ?1", [&owned], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(value)
            })
            .await?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Remove `key`. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        let n = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM kv WHERE key = ?1", [&key])?))
            .await?;
        Ok(n > 0)
    }

    /// All keys, in key order.
    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let keys = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
                let keys = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }

    /// Keys starting with `prefix`, in key order.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.to_string();
        let keys = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
                )?;
                let keys = stmt
                    .query_map([&prefix], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?))
            .await?;
        Ok(n as usize)
    }

    /// Close the connection, keeping the data on disk.
    ///
    /// Later calls on this store (or any shared handle to it) fail with a
    /// closed-connection error.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.conn.clone().close().await?;
        tracing::debug!(dir = %self.dir.display(), "kv store closed");
        Ok(())
    }

    /// Close the connection and delete the store directory.
    ///
    /// The directory is removed even if closing fails; the first error wins.
    pub async fn destroy(&self) -> Result<(), StoreError> {
        let closed = self.close().await;
        let removed = match tokio::fs::remove_dir_all(&self.dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(StoreError::Io(e)),
            _ => Ok(()),
        };
        tracing::debug!(dir = %self.dir.display(), "kv store destroyed");
        closed.and(removed)
    }
}
