//! Key-value persistence abstraction.
//!
//! The scheduler persists two kinds of records: the framework identity and
//! one full task record per task name. Any driver with string keys and
//! string values can back it; bundled drivers are [`MemoryStore`] for tests
//! and [`SqliteStore`] for durable single-node operation. Writes are
//! idempotent full-record upserts so recovery is a prefix scan.

mod memory;
mod sqlite;

pub use memory::{FlakyStore, MemoryStore};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

/// Key the framework identity is stored under.
pub const FRAMEWORK_ID_KEY: &str = "framework/id";

/// Prefix task records are stored under.
pub const TASKS_PREFIX: &str = "tasks/";

/// Storage key for a task record.
#[must_use]
pub fn task_key(name: &str) -> String {
    format!("{TASKS_PREFIX}{name}")
}

/// Errors from storage drivers.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    /// The driver could not complete the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A `create` hit an existing key.
    #[error("key already exists: {0}")]
    AlreadyExists(String),
}

/// A string-keyed, string-valued store.
///
/// `create` and `update` are both full-record writes; `update` upserts,
/// `create` fails on an existing key. Reads of absent keys return `None`
/// rather than an error so callers can distinguish outages from misses.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write a new record; fails if the key exists.
    async fn create(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Read a single record.
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Read all records under a key prefix, ordered by key.
    async fn read_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError>;

    /// Write a record, replacing any existing value.
    async fn update(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a record. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key_layout() {
        assert_eq!(task_key("web-1"), "tasks/web-1");
        assert!(task_key("web-1").starts_with(TASKS_PREFIX));
    }
}
