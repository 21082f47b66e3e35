//! Task-type extension hooks.
//!
//! Each task nickname may have a [`TaskBehavior`] registered in a
//! [`TaskRegistry`]. The behavior is resolved once, when the [`Task`] is
//! built, and called through the trait from then on. Nicknames without a
//! registration get [`NoopBehavior`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::task::Task;

/// Caller metadata passed to `update`/`complete` and on to the audit entry.
pub type Metadata = Map<String, Value>;

/// Hooks a task type can implement. Every method defaults to a no-op.
///
/// A hook returning `Err` aborts the surrounding operation; the error is
/// surfaced as [`Error::Hook`](crate::Error::Hook).
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use hivework::task::behavior::{Metadata, TaskBehavior};
/// use hivework::Task;
///
/// struct NeedsSignature;
///
/// #[async_trait]
/// impl TaskBehavior for NeedsSignature {
///     fn completion_blocker(&self, task: &Task) -> Option<String> {
///         task.get("signature").is_none().then(|| "unsigned".to_string())
///     }
///
///     async fn before_complete(&self, task: &mut Task, _: &Metadata) -> anyhow::Result<()> {
///         task.set("signed_off", serde_json::json!(true));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskBehavior: Send + Sync {
    /// Runs before `update` and `complete` persist anything.
    async fn before_update(&self, _task: &mut Task, _metadata: &Metadata) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after `update` and `complete` succeed.
    async fn after_update(&self, _task: &mut Task, _metadata: &Metadata) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after `before_update`, before the process is advanced.
    async fn before_complete(&self, _task: &mut Task, _metadata: &Metadata) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once the process has been advanced.
    async fn after_complete(&self, _task: &mut Task, _metadata: &Metadata) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once per delivery, after the dispatch is audited.
    async fn after_dispatch(&self, _task: &mut Task) -> anyhow::Result<()> {
        Ok(())
    }

    /// Reason the task cannot be completed right now, if any.
    fn completion_blocker(&self, _task: &Task) -> Option<String> {
        None
    }
}

/// Behavior with every hook left at its default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBehavior;

impl TaskBehavior for NoopBehavior {}

/// Behaviors keyed by task nickname.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    behaviors: HashMap<String, Arc<dyn TaskBehavior>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("nicknames", &self.behaviors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the behavior for a nickname, replacing any previous one.
    pub fn register(&mut self, nickname: impl Into<String>, behavior: Arc<dyn TaskBehavior>) {
        self.behaviors.insert(nickname.into(), behavior);
    }

    /// The behavior for a nickname, or [`NoopBehavior`].
    pub fn resolve(&self, nickname: Option<&str>) -> Arc<dyn TaskBehavior> {
        nickname
            .and_then(|n| self.behaviors.get(n))
            .cloned()
            .unwrap_or_else(|| Arc::new(NoopBehavior) as Arc<dyn TaskBehavior>)
    }
}
