//! Boundary to the workflow engine.
//!
//! The engine interprets process definitions, routes messages and owns
//! process state. This crate only observes and controls it through the
//! narrow [`Engine`] trait: launch, cancel/kill directives, process lookup,
//! the live process listing, the subscription (tracker) listing, and
//! `proceed` for completed work items.
//!
//! Directives are fire-and-forget. Their effect becomes visible through
//! [`Engine::process`] and [`Engine::process_ids`] eventually, never
//! synchronously; callers that need confirmation poll (see
//! [`ProcessController`](crate::ProcessController)).
//!
//! [`memory::InMemoryEngine`] is a reference implementation over the shared
//! [`Storage`](crate::store::Storage).

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::StorageError;
use crate::workitem::WorkItem;

/// Errors reported by an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No process definition is registered under this name.
    #[error("process definition not found: {0}")]
    UnknownDefinition(String),

    /// The work item no longer exists (already proceeded or cancelled).
    #[error("workitem no longer exists: {0}")]
    WorkitemGone(String),

    /// The engine cannot serve requests right now.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine's storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One node of a process's live expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    /// Expression id, unique within the process (e.g. `"0_1_0"`).
    pub expid: String,
    /// The expression as a `[name, attributes, children]` triple.
    pub tree: Value,
}

impl Expression {
    /// Expression name (first element of the tree).
    pub fn name(&self) -> Option<&str> {
        self.tree.get(0).and_then(Value::as_str)
    }

    /// Expression attributes (second element of the tree).
    pub fn attributes(&self) -> Option<&Map<String, Value>> {
        self.tree.get(1).and_then(Value::as_object)
    }
}

/// Snapshot of a live process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    /// Process instance id.
    pub wfid: String,
    /// Name of the definition the instance was launched from.
    pub definition_name: String,
    /// Live expressions, outermost first.
    pub expressions: Vec<Expression>,
    /// Launch time.
    pub launched_at: DateTime<Utc>,
}

impl ProcessStatus {
    /// Finds a live expression by id.
    pub fn expression(&self, expid: &str) -> Option<&Expression> {
        self.expressions.iter().find(|e| e.expid == expid)
    }
}

/// The operations this crate consumes from a workflow engine.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one engine handle is shared by
/// every task, finder and controller.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Launches a process instance and returns its id.
    async fn launch(&self, definition: &str, fields: Map<String, Value>)
        -> Result<String, EngineError>;

    /// Requests cancellation. On-cancel branches run before termination.
    async fn cancel(&self, wfid: &str) -> Result<(), EngineError>;

    /// Requests termination, skipping on-cancel branches.
    async fn kill(&self, wfid: &str) -> Result<(), EngineError>;

    /// Looks up a live process. `Ok(None)` once it is gone.
    async fn process(&self, wfid: &str) -> Result<Option<ProcessStatus>, EngineError>;

    /// Ids of every live process.
    async fn process_ids(&self) -> Result<Vec<String>, EngineError>;

    /// Every live subscription record, keyed by tracker id.
    async fn trackers(&self) -> Result<IndexMap<String, Value>, EngineError>;

    /// Hands a finished work item back so its process advances.
    ///
    /// # Errors
    ///
    /// [`EngineError::WorkitemGone`] if the item was already proceeded or
    /// removed.
    async fn proceed(&self, workitem: &WorkItem) -> Result<(), EngineError>;
}
