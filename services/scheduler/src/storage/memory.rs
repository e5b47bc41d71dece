//! In-memory storage driver, plus a fault-injecting wrapper for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Storage, StorageError};

/// In-memory store for tests and development.
///
/// A `BTreeMap` keeps keys ordered so prefix scans come back sorted, the
/// same contract real KV drivers give us.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held; test convenience.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True when no records are held.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn create(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        if records.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn read_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn update(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.records
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.records.write().await.remove(key);
        Ok(())
    }
}

/// A store that fails the first `n` write operations, then delegates.
///
/// Reads always pass through; this models a KV backend riding out a brief
/// outage while the scheduler keeps serving from memory.
pub struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicU32,
}

impl FlakyStore {
    /// Wrap an empty store that fails the first `failures` writes.
    #[must_use]
    pub fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
        }
    }

    /// Fail the next `failures` writes (`u32::MAX` for all of them).
    pub fn fail_next(&self, failures: u32) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }

    fn try_consume_failure(&self) -> Result<(), StorageError> {
        let left = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match left {
            Ok(_) => Err(StorageError::Backend("injected write failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Storage for FlakyStore {
    async fn create(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.try_consume_failure()?;
        self.inner.create(key, value).await
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.read(key).await
    }

    async fn read_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        self.inner.read_prefix(prefix).await
    }

    async fn update(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.try_consume_failure()?;
        self.inner.update(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.try_consume_failure()?;
        self.inner.delete(key).await
    }
}
