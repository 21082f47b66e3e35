//! Document store trait, generic implementation, and supporting types.
//!
//! # Architecture
//!
//! The storage system has three layers:
//!
//! 1. **[`Storage`]** -- A type-erasure interface used as `Arc<dyn Storage>`
//!    by the [`Coordinator`](crate::Coordinator) and the engine.
//!
//! 2. **[`GenericStorage<B>`]** -- Envelope encoding, per-process scoping
//!    and process removal on top of any backend. Has a `Storage` impl.
//!
//! 3. **[`StorageBackend`]** -- Dumb KV trait that backends implement.
//!
//! # Document model
//!
//! Every stored value is a [`Document`]: an id, the owning process id
//! (`wfid`) and an opaque JSON body. Documents are partitioned by
//! [`DocKind`]. `get_many` can restrict a scan to a set of process ids;
//! `remove_process` deletes every document a process owns, across kinds.

pub mod backend;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use backend::{StorageBackend, StorageError, VersionedRecord};

use crate::store::backend::{make_key, make_prefix};
use crate::store::memory::InMemoryBackend;

/// Partition of the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocKind {
    /// In-flight work items.
    Workitems,
    /// Process instance state owned by the engine.
    Processes,
    /// Subscription (tracker) records owned by the engine.
    Trackers,
}

impl DocKind {
    /// All kinds, in a fixed order.
    pub const ALL: [DocKind; 3] = [DocKind::Workitems, DocKind::Processes, DocKind::Trackers];

    /// Stable name used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workitems => "workitems",
            Self::Processes => "processes",
            Self::Trackers => "trackers",
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stored envelope around a document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id, unique within its kind.
    pub id: String,
    /// The process instance that owns this document, if any.
    #[serde(default)]
    pub wfid: Option<String>,
    /// Opaque document body.
    pub body: Value,
}

impl Document {
    /// Creates a document owned by the given process.
    pub fn new(id: impl Into<String>, wfid: Option<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            wfid,
            body,
        }
    }
}

/// Type-erasure interface for the shared document store.
///
/// Writes are whole-document replacements. There are no multi-document
/// transactions. `put` is last-write-wins; `put_if_version` is the
/// single-document compare-and-swap used by exclusive claims.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetches one document. `Ok(None)` when absent.
    async fn get(&self, kind: DocKind, id: &str) -> Result<Option<Document>, StorageError>;

    /// Fetches every document of `kind`, optionally restricted to the given
    /// owning process ids. `Some(&[])` yields nothing.
    async fn get_many(
        &self,
        kind: DocKind,
        wfids: Option<&[String]>,
    ) -> Result<Vec<Document>, StorageError>;

    /// Fetches one document with its current version. `Ok(None)` when absent.
    async fn get_versioned(
        &self,
        kind: DocKind,
        id: &str,
    ) -> Result<Option<(Document, u64)>, StorageError>;

    /// Atomically replaces (or creates) one document. Returns its new version.
    async fn put(&self, kind: DocKind, document: &Document) -> Result<u64, StorageError>;

    /// Replaces an existing document only if it is still at `expected_version`.
    ///
    /// # Errors
    ///
    /// [`StorageError::VersionConflict`] if the document changed since it
    /// was read, [`StorageError::NotFound`] if it is gone.
    async fn put_if_version(
        &self,
        kind: DocKind,
        document: &Document,
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Deletes one document. Returns `true` if it existed.
    async fn delete(&self, kind: DocKind, id: &str) -> Result<bool, StorageError>;

    /// Deletes every document, of every kind, owned by `wfid`.
    async fn remove_process(&self, wfid: &str) -> Result<usize, StorageError>;

    /// Deletes everything.
    async fn clear(&self) -> Result<usize, StorageError>;
}

/// Document store that delegates raw persistence to a [`StorageBackend`].
#[derive(Debug)]
pub struct GenericStorage<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> GenericStorage<B> {
    /// Creates a store over the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn encode(document: &Document) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(document).map_err(|e| StorageError::Backend {
            message: format!("failed to serialize document {}", document.id),
            source: Some(Box::new(e)),
        })
    }

    fn decode(key: &str, data: &[u8]) -> Result<Document, StorageError> {
        serde_json::from_slice(data).map_err(|e| StorageError::Backend {
            message: format!("failed to deserialize document at {key}"),
            source: Some(Box::new(e)),
        })
    }

    async fn scan(&self, kind: DocKind) -> Result<Vec<Document>, StorageError> {
        let records = self.backend.list_by_prefix(&make_prefix(kind.as_str())).await?;
        let mut documents = Vec::with_capacity(records.len());
        for (key, record) in records {
            match Self::decode(&key, &record.data) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping undecodable document");
                },
            }
        }
        Ok(documents)
    }
}

impl GenericStorage<InMemoryBackend> {
    /// Creates a store over a fresh [`InMemoryBackend`].
    ///
    /// # Examples
    ///
    /// ```
    /// use hivework::store::GenericStorage;
    ///
    /// let storage = GenericStorage::in_memory();
    /// assert!(storage.backend().is_empty());
    /// ```
    pub fn in_memory() -> Self {
        Self::new(InMemoryBackend::new())
    }
}

#[async_trait]
impl<B: StorageBackend + 'static> Storage for GenericStorage<B> {
    async fn get(&self, kind: DocKind, id: &str) -> Result<Option<Document>, StorageError> {
        let key = make_key(kind.as_str(), id);
        match self.backend.get(&key).await {
            Ok(record) => Self::decode(&key, &record.data).map(Some),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_versioned(
        &self,
        kind: DocKind,
        id: &str,
    ) -> Result<Option<(Document, u64)>, StorageError> {
        let key = make_key(kind.as_str(), id);
        match self.backend.get(&key).await {
            Ok(record) => Ok(Some((Self::decode(&key, &record.data)?, record.version))),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_many(
        &self,
        kind: DocKind,
        wfids: Option<&[String]>,
    ) -> Result<Vec<Document>, StorageError> {
        if let Some([]) = wfids {
            return Ok(Vec::new());
        }
        let documents = self.scan(kind).await?;
        Ok(match wfids {
            None => documents,
            Some(wfids) => documents
                .into_iter()
                .filter(|doc| {
                    doc.wfid
                        .as_ref()
                        .is_some_and(|wfid| wfids.iter().any(|w| w == wfid))
                })
                .collect(),
        })
    }

    async fn put(&self, kind: DocKind, document: &Document) -> Result<u64, StorageError> {
        let key = make_key(kind.as_str(), &document.id);
        let bytes = Self::encode(document)?;
        let version = self.backend.put(&key, &bytes).await?;
        tracing::trace!(key = %key, version, "document stored");
        Ok(version)
    }

    async fn put_if_version(
        &self,
        kind: DocKind,
        document: &Document,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let key = make_key(kind.as_str(), &document.id);
        let bytes = Self::encode(document)?;
        let version = self
            .backend
            .put_if_version(&key, &bytes, expected_version)
            .await?;
        tracing::trace!(key = %key, version, "document stored after version check");
        Ok(version)
    }

    async fn delete(&self, kind: DocKind, id: &str) -> Result<bool, StorageError> {
        self.backend.delete(&make_key(kind.as_str(), id)).await
    }

    async fn remove_process(&self, wfid: &str) -> Result<usize, StorageError> {
        let mut removed = 0;
        for kind in DocKind::ALL {
            for document in self.scan(kind).await? {
                if document.wfid.as_deref() == Some(wfid)
                    && self.backend.delete(&make_key(kind.as_str(), &document.id)).await?
                {
                    removed += 1;
                }
            }
        }
        tracing::debug!(wfid = %wfid, removed, "process documents removed");
        Ok(removed)
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let removed = self.backend.clear().await?;
        tracing::debug!(removed, "storage cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> GenericStorage<InMemoryBackend> {
        let storage = GenericStorage::in_memory();
        for (id, wfid) in [("a", "wf-1"), ("b", "wf-1"), ("c", "wf-2")] {
            storage
                .put(
                    DocKind::Workitems,
                    &Document::new(id, Some(wfid.to_string()), json!({ "n": id })),
                )
                .await
                .unwrap();
        }
        storage
            .put(
                DocKind::Processes,
                &Document::new("wf-1", Some("wf-1".to_string()), json!({})),
            )
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn get_round_trips_document() {
        let storage = seeded().await;
        let doc = storage.get(DocKind::Workitems, "a").await.unwrap().unwrap();
        assert_eq!(doc.wfid.as_deref(), Some("wf-1"));
        assert_eq!(doc.body, json!({ "n": "a" }));
        assert!(storage.get(DocKind::Workitems, "zz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_many_scopes_by_process() {
        let storage = seeded().await;
        assert_eq!(storage.get_many(DocKind::Workitems, None).await.unwrap().len(), 3);

        let scoped = storage
            .get_many(DocKind::Workitems, Some(&["wf-2".to_string()]))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "c");

        let none = storage.get_many(DocKind::Workitems, Some(&[])).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn versioned_put_rejects_stale_writers() {
        let storage = seeded().await;
        let (doc, version) = storage
            .get_versioned(DocKind::Workitems, "a")
            .await
            .unwrap()
            .unwrap();
        storage
            .put_if_version(DocKind::Workitems, &doc, version)
            .await
            .unwrap();
        let err = storage
            .put_if_version(DocKind::Workitems, &doc, version)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));
        assert!(storage.get_versioned(DocKind::Workitems, "zz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capacity_limit_surfaces_through_put() {
        let storage = GenericStorage::new(InMemoryBackend::new().with_max_records(1));
        let doc = |id: &str| Document::new(id, Some("wf".to_string()), json!({}));
        storage.put(DocKind::Workitems, &doc("a")).await.unwrap();
        let err = storage.put(DocKind::Trackers, &doc("b")).await.unwrap_err();
        assert!(matches!(err, StorageError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn remove_process_spans_kinds() {
        let storage = seeded().await;
        assert_eq!(storage.remove_process("wf-1").await.unwrap(), 3);
        assert_eq!(storage.get_many(DocKind::Workitems, None).await.unwrap().len(), 1);
        assert!(storage.get(DocKind::Processes, "wf-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_documents_are_skipped() {
        let storage = seeded().await;
        storage
            .backend()
            .put("workitems:broken", b"not json")
            .await
            .unwrap();
        assert_eq!(storage.get_many(DocKind::Workitems, None).await.unwrap().len(), 3);
    }
}
