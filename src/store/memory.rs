//! In-memory storage backend.
//!
//! [`InMemoryBackend`] provides a thread-safe [`StorageBackend`] implementation
//! using `DashMap<String, (Vec<u8>, u64)>` for concurrent key-value storage.
//! It is a dumb KV store with no domain logic.
//!
//! # Concurrency
//!
//! `DashMap` gives shard-level locking, so each `put` is an atomic
//! single-key replace: two writers racing on the same key both succeed and
//! the later write wins. `put_if_version` holds the shard lock across the
//! version check and the write.
//!
//! # Capacity
//!
//! [`InMemoryBackend::with_max_records`] caps the number of keys. Writes
//! that would create a key past the cap fail with
//! [`StorageError::CapacityExceeded`]; overwrites always succeed.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};

/// Thread-safe in-memory storage backend using [`DashMap`].
///
/// # Examples
///
/// ```
/// use hivework::store::memory::InMemoryBackend;
/// use hivework::store::GenericStorage;
///
/// let storage = GenericStorage::new(InMemoryBackend::new());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: DashMap<String, (Vec<u8>, u64)>,
    max_records: Option<usize>,
}

impl InMemoryBackend {
    /// Creates an empty, unbounded in-memory backend.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            max_records: None,
        }
    }

    /// Caps the number of stored records.
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = Some(max);
        self
    }

    /// Returns the number of records stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the backend contains no records.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        let entry = self.data.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let (data, version) = entry.value();
        Ok(VersionedRecord {
            data: data.clone(),
            version: *version,
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        if let Some(max) = self.max_records {
            if !self.data.contains_key(key) && self.data.len() >= max {
                return Err(StorageError::CapacityExceeded {
                    message: format!("max {max} records"),
                });
            }
        }
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| (Vec::new(), 0));
        let new_version = entry.value().1 + 1;
        *entry.value_mut() = (data.to_vec(), new_version);
        Ok(new_version)
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let mut entry = self
            .data
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        let current_version = entry.value().1;
        if current_version != expected_version {
            return Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: current_version,
            });
        }
        let new_version = current_version + 1;
        *entry.value_mut() = (data.to_vec(), new_version);
        Ok(new_version)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.remove(key).is_some())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        let results: Vec<(String, VersionedRecord)> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| {
                let (data, version) = entry.value();
                (
                    entry.key().clone(),
                    VersionedRecord {
                        data: data.clone(),
                        version: *version,
                    },
                )
            })
            .collect();
        Ok(results)
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let count = self.data.len();
        self.data.clear();
        Ok(count)
    }
}
