//! Durable key-value state: the client id and the enabled flag.
//!
//! [`SqliteStorage`] keeps both in a single `kv` table next to the rest of
//! profbeacon's data; [`MemoryStorage`] is for hosts without persistence
//! and for tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

/// Storage key for the registered client id
pub const KEY_CLIENT_ID: &str = "uid";
/// Storage key for the enabled flag (`"true"` / `"false"`)
pub const KEY_ENABLED: &str = "enabled";

/// Async key-value store.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

// ============================================
// SQLite
// ============================================

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: key-value table
    r#"
    CREATE TABLE IF NOT EXISTS kv (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL,
        updated_at       DATETIME NOT NULL
    );
    "#,
];

/// Run all pending migrations on `conn`.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// SQLite-backed [`Storage`].
///
/// rusqlite is synchronous, so every call hops onto the blocking pool.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create the state database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn get_blocking(conn: &Mutex<Connection>, key: &str) -> Result<Option<String>> {
        let conn = conn
            .lock()
            .map_err(|_| Error::Storage("state database lock poisoned".to_string()))?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set_blocking(conn: &Mutex<Connection>, key: &str, value: &str) -> Result<()> {
        let conn = conn
            .lock()
            .map_err(|_| Error::Storage("state database lock poisoned".to_string()))?;
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::get_blocking(&conn, &key))
            .await
            .map_err(|e| Error::Storage(format!("storage task failed: {}", e)))?
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || Self::set_blocking(&conn, &key, &value))
            .await
            .map_err(|e| Error::Storage(format!("storage task failed: {}", e)))?
    }
}

// ============================================
// In-memory
// ============================================

/// Process-local [`Storage`]; forgets everything on exit.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    items: Arc<tokio::sync::Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store
    pub fn with_items<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let items = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            items: Arc::new(tokio::sync::Mutex::new(items)),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_sqlite_get_set() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert_eq!(storage.get(KEY_CLIENT_ID).await.unwrap(), None);

        storage.set(KEY_CLIENT_ID, "abc123").await.unwrap();
        storage.set(KEY_ENABLED, "true").await.unwrap();
        storage.set(KEY_ENABLED, "false").await.unwrap();

        assert_eq!(
            storage.get(KEY_CLIENT_ID).await.unwrap().as_deref(),
            Some("abc123")
        );
        assert_eq!(
            storage.get(KEY_ENABLED).await.unwrap().as_deref(),
            Some("false")
        );
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.set(KEY_CLIENT_ID, "persisted").await.unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(
            storage.get(KEY_CLIENT_ID).await.unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::with_items([(KEY_CLIENT_ID, "seeded")]);
        assert_eq!(
            storage.get(KEY_CLIENT_ID).await.unwrap().as_deref(),
            Some("seeded")
        );
        assert_eq!(storage.get(KEY_ENABLED).await.unwrap(), None);
        storage.set(KEY_ENABLED, "false").await.unwrap();
        assert_eq!(
            storage.get(KEY_ENABLED).await.unwrap().as_deref(),
            Some("false")
        );
    }
}
