//! Low-level key-value storage backend trait and supporting types.
//!
//! The [`StorageBackend`] trait defines the contract that all storage engines
//! implement. It exposes 6 KV operations: [`get`](StorageBackend::get),
//! [`put`](StorageBackend::put),
//! [`put_if_version`](StorageBackend::put_if_version),
//! [`delete`](StorageBackend::delete),
//! [`list_by_prefix`](StorageBackend::list_by_prefix) and
//! [`clear`](StorageBackend::clear).
//!
//! Domain logic (document envelopes, process scoping, process removal) does
//! **not** belong here. Backends are dumb KV stores; domain logic lives in
//! [`GenericStorage`](crate::store::GenericStorage).
//!
//! # Key Structure
//!
//! Keys are composite strings in the format `{kind}:{id}`. Kinds are fixed
//! identifiers without colons, so prefix queries on `{kind}:` scope a listing
//! to one document kind.
//!
//! # Versioning
//!
//! Each stored record carries a monotonic `u64` version number starting at
//! 1, incremented on every successful write. `put` is an unconditional
//! whole-record replacement: the last writer wins. `put_if_version` only
//! writes when the stored version still matches.

use std::fmt;

use async_trait::async_trait;

/// A stored record paired with its monotonic version number.
///
/// # Examples
///
/// ```
/// use hivework::store::backend::VersionedRecord;
///
/// let record = VersionedRecord {
///     data: b"{}".to_vec(),
///     version: 1,
/// };
/// assert_eq!(record.version, 1);
/// ```
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// The serialized document bytes (JSON).
    pub data: Vec<u8>,

    /// Monotonic version number. Starts at 1, increments on each
    /// successful write.
    pub version: u64,
}

/// Errors that can occur during raw storage operations.
///
/// # Examples
///
/// ```
/// use hivework::store::backend::StorageError;
///
/// let err = StorageError::NotFound { key: "workitems:wi-1".to_string() };
/// assert!(err.to_string().contains("workitems:wi-1"));
/// ```
#[derive(Debug)]
pub enum StorageError {
    /// The requested key was not found in storage.
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A [`put_if_version`](StorageBackend::put_if_version) call found a
    /// different stored version.
    VersionConflict {
        /// The contended key.
        key: String,
        /// The version the caller expected.
        expected: u64,
        /// The version actually stored.
        actual: u64,
    },

    /// The backend has reached a capacity limit.
    CapacityExceeded {
        /// Human-readable description of the capacity issue.
        message: String,
    },

    /// An I/O, encoding or backend-specific error occurred.
    Backend {
        /// Human-readable description of the error.
        message: String,
        /// The underlying error, if available. Accessible via
        /// [`std::error::Error::source()`].
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// Builds a [`StorageError::Backend`] without an underlying source.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "key not found: {key}"),
            Self::VersionConflict {
                key,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on {key}: expected {expected}, found {actual}"
            ),
            Self::CapacityExceeded { message } => {
                write!(f, "capacity exceeded: {message}")
            },
            Self::Backend { message, .. } => write!(f, "backend error: {message}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

/// Key-value storage backend for document persistence.
///
/// Implementations provide raw storage primitives. Backends must store and
/// return keys verbatim and must make each `put` an atomic replacement of
/// a single key. No multi-key transactions are required.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; every worker shares one backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a record by key.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no record exists for the given key.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError>;

    /// Stores a record unconditionally (create or overwrite).
    ///
    /// For new keys, the backend assigns version 1. For existing keys,
    /// the backend increments the current version. Returns the assigned
    /// version number.
    ///
    /// # Errors
    ///
    /// - [`StorageError::CapacityExceeded`] if the backend is at capacity.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Replaces an existing record only if its version is `expected_version`.
    ///
    /// The check and the write are atomic. Returns the new version.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the key does not exist.
    /// - [`StorageError::VersionConflict`] if the stored version differs.
    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Deletes a record by key.
    ///
    /// Returns `true` if the key existed and was deleted, `false` if the
    /// key did not exist (idempotent delete).
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Lists all records whose key starts with the given prefix.
    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError>;

    /// Removes every record. Returns the number of records removed.
    async fn clear(&self) -> Result<usize, StorageError>;
}

/// Constructs a storage key from a document kind and id.
///
/// # Examples
///
/// ```
/// use hivework::store::backend::make_key;
///
/// assert_eq!(make_key("workitems", "wi-1"), "workitems:wi-1");
/// ```
pub fn make_key(kind: &str, id: &str) -> String {
    format!("{kind}:{id}")
}

/// Constructs the prefix that lists every document of a kind.
pub fn make_prefix(kind: &str) -> String {
    format!("{kind}:")
}
