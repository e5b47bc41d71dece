//! SQLite-backed storage driver.
//!
//! A single `kv` table provides durable storage for the framework identity
//! and task records, enabling failover after scheduler restarts. WAL mode
//! keeps readers from blocking the event loop's write-through path.

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;

use async_trait::async_trait;

use super::{Storage, StorageError};

/// SQLite key-value store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(backend)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(backend)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn create(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(backend)?;
        if inserted == 0 {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(backend)
    }

    async fn read_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key")
            .map_err(backend)?;

        // Keys are restricted to printable identifiers, so bumping the last
        // byte bounds the scan without LIKE-escaping.
        let upper = prefix_upper_bound(prefix);
        let rows = stmt
            .query_map(params![prefix, upper], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        Ok(rows)
    }

    async fn update(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO kv (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(backend)?;
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )
    .map_err(backend)?;
    debug!("Storage schema initialized");
    Ok(())
}

fn backend(err: rusqlite::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn prefix_upper_bound(prefix: &str) -> String {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return String::from_utf8_lossy(&bytes).into_owned();
        }
        bytes.pop();
    }
    // Empty prefix scans everything; '\u{10FFFF}' sorts after any key.
    "\u{10FFFF}".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_crud_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();

        store.create("framework/id", "fw-1").await.unwrap();
        assert_eq!(
            store.read("framework/id").await.unwrap().as_deref(),
            Some("fw-1")
        );

        let err = store.create("framework/id", "fw-2").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        store.update("framework/id", "fw-2").await.unwrap();
        assert_eq!(
            store.read("framework/id").await.unwrap().as_deref(),
            Some("fw-2")
        );

        store.delete("framework/id").await.unwrap();
        assert_eq!(store.read("framework/id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_prefix_scan() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.update("tasks/web-1", "a").await.unwrap();
        store.update("tasks/db-1", "b").await.unwrap();
        store.update("framework/id", "fw").await.unwrap();

        let records = store.read_prefix("tasks/").await.unwrap();
        let keys: Vec<_> = records.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["tasks/db-1", "tasks/web-1"]);
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound("tasks/"), "tasks0");
        assert_eq!(prefix_upper_bound("a"), "b");
    }
}
