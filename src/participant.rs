//! Delivery of work items from the engine into this layer.
//!
//! The engine hands each new work item to a [`Participant`].
//! [`StorageParticipant`] is the one that makes items visible as tasks:
//! it persists the item, wraps it as a [`Task`], fires
//! [`Task::on_dispatch`] exactly once, then passes the task to an optional
//! [`WorkHandler`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::store::DocKind;
use crate::task::Task;
use crate::workitem::WorkItem;

/// Receives work items delivered by the engine.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Called once per delivered work item.
    async fn on_workitem(&self, workitem: WorkItem) -> Result<()>;
}

/// Handler-specific processing run after a task has been dispatched.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Processes a freshly dispatched task.
    async fn work(&self, task: Task) -> anyhow::Result<()>;
}

/// Participant that stores work items and exposes them as tasks.
pub struct StorageParticipant {
    coordinator: Coordinator,
    handler: Option<Arc<dyn WorkHandler>>,
}

impl std::fmt::Debug for StorageParticipant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageParticipant")
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl StorageParticipant {
    /// Creates a participant bound to `coordinator`.
    pub fn new(coordinator: Coordinator, handler: Option<Arc<dyn WorkHandler>>) -> Self {
        Self {
            coordinator,
            handler,
        }
    }
}

#[async_trait]
impl Participant for StorageParticipant {
    async fn on_workitem(&self, workitem: WorkItem) -> Result<()> {
        let id = workitem.id.clone();
        self.coordinator
            .storage()
            .put(DocKind::Workitems, &workitem.to_document()?)
            .await?;

        // The stored copy is the one tasks see from now on.
        let mut task = self.coordinator.task(&id).await?;
        task.on_dispatch().await?;

        if let Some(handler) = &self.handler {
            handler.work(task).await.map_err(|source| Error::Hook {
                hook: "work",
                source,
            })?;
        }
        Ok(())
    }
}
