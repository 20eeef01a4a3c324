//! Durable key-value blob store: whole-string get/set/remove plus an atomic update.
//!
//! The stores built on top of this trait never append in place. They read a blob, change it
//! and write it back through [`KvStore::update`], which is atomic against every other handle
//! on the same store, including handles held by other processes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::Result;

/// How long a writer waits for another process's transaction before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-modify-write step: gets the current value, returns the new one (`None` removes the key).
pub type Update<'a> = &'a mut (dyn FnMut(Option<String>) -> Result<Option<String>> + Send);

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
    /// Apply `f` to the value at `key` with no other writer in between.
    /// When `f` fails nothing is written.
    async fn update(&self, key: &str, f: Update<'_>) -> Result<()>;
}

/// Process-local store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: tokio::sync::Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.entries.lock().await.get(key).cloned();
        // every storage call is a suspension point, as it is for a real store
        tokio::task::yield_now().await;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn update(&self, key: &str, f: Update<'_>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let current = entries.get(key).cloned();
        tokio::task::yield_now().await;
        match f(current)? {
            Some(value) => entries.insert(key.to_string(), value),
            None => entries.remove(key),
        };
        Ok(())
    }
}

/// SQLite-backed store: one `kv(key, value)` table in a single database file.
///
/// Updates run in `BEGIN IMMEDIATE` transactions, so a daemon and a CLI invocation sharing the
/// file never interleave their read-modify-writes.
#[derive(Debug)]
pub struct SqliteKv {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteKv {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 key   TEXT PRIMARY KEY NOT NULL,
                 value TEXT NOT NULL
             )",
        )?;
        tracing::debug!(path = %path.display(), "kv store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn read(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .optional()
}

fn write(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn delete(conn: &Connection, key: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
    Ok(())
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(read(&self.conn(), key)?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        Ok(write(&self.conn(), key, value)?)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        Ok(delete(&self.conn(), key)?)
    }

    async fn update(&self, key: &str, f: Update<'_>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = read(&tx, key)?;
        match f(current)? {
            Some(value) => write(&tx, key, &value)?,
            None => delete(&tx, key)?,
        }
        tx.commit()?;
        Ok(())
    }
}
