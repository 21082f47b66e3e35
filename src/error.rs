//! Error types for coordination operations.
//!
//! Provides [`Error`], a rich error enum with context fields, and
//! [`ErrorKind`], the coarse classification callers branch on
//! (conflict, not found, invalid state, timeout, backend).

use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;
use crate::store::StorageError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while claiming, querying or terminating work.
///
/// Each variant carries the context needed to explain the failure (the
/// conflicting claimant, the deadline that elapsed, ...). Use
/// [`kind`](Error::kind) to branch on the failure class.
///
/// # Examples
///
/// ```
/// use hivework::{Error, ErrorKind};
///
/// let err = Error::AlreadyClaimed {
///     task_id: "wi-1".to_string(),
///     claimant: "alice".to_string(),
/// };
/// assert_eq!(err.kind(), ErrorKind::Conflict);
/// assert!(err.to_string().contains("alice"));
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The task is claimed by a different token.
    #[error("task {task_id} already claimed by {claimant}")]
    AlreadyClaimed {
        /// The contended task.
        task_id: String,
        /// The token currently holding the claim.
        claimant: String,
    },

    /// A claim was attempted with an empty token.
    #[error("task {task_id} cannot be claimed with an empty token")]
    EmptyClaimToken {
        /// The task.
        task_id: String,
    },

    /// The stored item changed between the read and the versioned write of
    /// an exclusive claim.
    #[error("task {task_id} changed while claiming (expected version {expected}, found {actual})")]
    StaleClaim {
        /// The contended task.
        task_id: String,
        /// Version the claim was based on.
        expected: u64,
        /// Version found in the store.
        actual: u64,
    },

    /// No work item exists for the given id, or the store could not serve it.
    #[error("workitem not found: {id}{}", .reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
    MissingWorkitem {
        /// The requested work item id.
        id: String,
        /// Underlying cause when the lookup failed rather than came back empty.
        reason: Option<String>,
    },

    /// The task's domain entity could not be resolved.
    #[error("entity not found for task {task_id} (type: {}, id: {})",
        .entity_type.as_deref().unwrap_or("<none>"),
        .entity_id.as_deref().unwrap_or("<none>"))]
    EntityNotFound {
        /// The task whose entity was requested.
        task_id: String,
        /// The `entity_type` field, if present.
        entity_type: Option<String>,
        /// The `entity_id` field, if present.
        entity_id: Option<String>,
    },

    /// Completion was attempted on a task that cannot be completed.
    #[error("task {task_id} is not completable: {reason}")]
    NotCompletable {
        /// The task.
        task_id: String,
        /// Why the task is not completable.
        reason: String,
    },

    /// No task matched the finder criteria before the deadline.
    #[error("no task found matching criteria within {timeout:?}")]
    AvailabilityTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Cancellation did not converge before the deadline.
    #[error("process cancel timed out after {timeout:?}: {remaining} processes still live")]
    CancelTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
        /// Number of targeted processes still reported live.
        remaining: usize,
    },

    /// Kill did not converge before the deadline.
    #[error("process kill timed out after {timeout:?}: {remaining} processes still live")]
    KillTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
        /// Number of targeted processes still reported live.
        remaining: usize,
    },

    /// A stored work item could not be decoded.
    #[error("invalid workitem: {0}")]
    InvalidWorkitem(String),

    /// A task behavior hook failed.
    #[error("task hook {hook} failed: {source}")]
    Hook {
        /// The hook that failed (`before_update`, `after_complete`, ...).
        hook: &'static str,
        /// The hook's error.
        #[source]
        source: anyhow::Error,
    },

    /// The document store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The workflow engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A competing actor holds the resource.
    Conflict,
    /// The requested item does not exist.
    NotFound,
    /// The operation is not valid in the current state.
    InvalidState,
    /// A deadline elapsed.
    Timeout,
    /// A collaborator (store, engine, hook) failed.
    Backend,
}

impl Error {
    /// Maps this error to its [`ErrorKind`].
    ///
    /// - `Conflict`: `AlreadyClaimed`, `StaleClaim`
    /// - `NotFound`: `MissingWorkitem`, `EntityNotFound`
    /// - `InvalidState`: `EmptyClaimToken`, `NotCompletable`, `InvalidWorkitem`
    /// - `Timeout`: `AvailabilityTimeout`, `CancelTimeout`, `KillTimeout`
    /// - `Backend`: `Hook`, `Storage`, `Engine`
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyClaimed { .. } | Self::StaleClaim { .. } => ErrorKind::Conflict,
            Self::MissingWorkitem { .. } | Self::EntityNotFound { .. } => ErrorKind::NotFound,
            Self::EmptyClaimToken { .. }
            | Self::NotCompletable { .. }
            | Self::InvalidWorkitem(_) => ErrorKind::InvalidState,
            Self::AvailabilityTimeout { .. }
            | Self::CancelTimeout { .. }
            | Self::KillTimeout { .. } => ErrorKind::Timeout,
            Self::Hook { .. } | Self::Storage(_) | Self::Engine(_) => ErrorKind::Backend,
        }
    }

    /// Returns `true` for any of the timeout variants.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub(crate) fn missing(id: impl Into<String>) -> Self {
        Self::MissingWorkitem {
            id: id.into(),
            reason: None,
        }
    }
}
