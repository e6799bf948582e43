//! Versioned record storage.
//!
//! Flow records (auth requests, device authorizations, IDP intents) are kept
//! behind [`RecordStore`]. Every write bumps a version number and terminal
//! transitions use [`RecordStore::replace`] as a compare-and-swap against the
//! version that was read, so two concurrent transitions on one record cannot
//! both win.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CacheResult;

/// A record together with the version it was stored at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Monotonic write counter, starting at 1 on insert.
    pub version: u64,
    /// The stored record.
    pub record: T,
}

/// Keyed record store with secondary aliases and optimistic concurrency.
#[async_trait]
pub trait RecordStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Inserts a new record under `key`, reachable also through `aliases`.
    ///
    /// All-or-nothing: returns `false` without writing anything if the key
    /// or any alias is already taken.
    async fn insert(&self, key: &str, aliases: &[String], record: T) -> CacheResult<bool>;

    /// Gets a record and its version.
    async fn get(&self, key: &str) -> CacheResult<Option<Versioned<T>>>;

    /// Resolves an alias to its primary key.
    async fn resolve_alias(&self, alias: &str) -> CacheResult<Option<String>>;

    /// Replaces the record if its current version equals `expected_version`.
    ///
    /// Returns `false` if the record is missing or was written in between.
    async fn replace(&self, key: &str, expected_version: u64, record: T) -> CacheResult<bool>;
}

#[derive(Debug)]
struct Inner<T> {
    records: HashMap<String, Versioned<T>>,
    aliases: HashMap<String, String>,
}

/// In-memory record store.
#[derive(Debug)]
pub struct MemoryRecordStore<T> {
    inner: RwLock<Inner<T>>,
}

impl<T> MemoryRecordStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                aliases: HashMap::new(),
            }),
        }
    }

    /// Returns the number of stored records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Returns whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }
}

impl<T> Default for MemoryRecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> RecordStore<T> for MemoryRecordStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn insert(&self, key: &str, aliases: &[String], record: T) -> CacheResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.records.contains_key(key) || aliases.iter().any(|a| inner.aliases.contains_key(a))
        {
            return Ok(false);
        }
        for alias in aliases {
            inner.aliases.insert(alias.clone(), key.to_string());
        }
        inner
            .records
            .insert(key.to_string(), Versioned { version: 1, record });
        Ok(true)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Versioned<T>>> {
        Ok(self.inner.read().await.records.get(key).cloned())
    }

    async fn resolve_alias(&self, alias: &str) -> CacheResult<Option<String>> {
        Ok(self.inner.read().await.aliases.get(alias).cloned())
    }

    async fn replace(&self, key: &str, expected_version: u64, record: T) -> CacheResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(key) {
            Some(current) if current.version == expected_version => {
                current.version += 1;
                current.record = record;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
