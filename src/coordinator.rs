//! The coordinator handle.
//!
//! [`Coordinator`] ties the engine, the document store, task behaviors,
//! entity finders, the audit sink and configuration together. It is
//! `Clone + Send + Sync`; clones share the same collaborators, so tasks,
//! finders, process views and trackers each carry one.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use hivework::engine::memory::{InMemoryEngine, ProcessDefinition};
//! use hivework::store::{GenericStorage, Storage};
//! use hivework::Coordinator;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let storage: Arc<dyn Storage> = Arc::new(GenericStorage::in_memory());
//! let engine = Arc::new(InMemoryEngine::new(storage.clone()));
//! engine.define(ProcessDefinition::new("chores").task("bob", "chew_cud"));
//!
//! let coordinator = Coordinator::builder(engine.clone(), storage).build();
//! let participant: Arc<dyn hivework::Participant> = coordinator.storage_participant(None);
//! engine.register_participant(&participant);
//!
//! let process = coordinator.launch("chores", Default::default()).await.unwrap();
//! let task = coordinator.tasks().for_process(process.wfid()).first().await.unwrap().unwrap();
//! assert_eq!(task.nickname(), Some("chew_cud"));
//! # });
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::audit::{AuditEntry, AuditSink, NullAuditSink, TracingAuditSink};
use crate::config::CoordinatorConfig;
use crate::engine::Engine;
use crate::entity::{EntityFinder, EntityRegistry};
use crate::error::{Error, Result};
use crate::lifecycle::ProcessController;
use crate::participant::{StorageParticipant, WorkHandler};
use crate::process::Process;
use crate::store::{DocKind, Storage};
use crate::task::behavior::{TaskBehavior, TaskRegistry};
use crate::task::finder::TaskFinder;
use crate::task::Task;
use crate::tracker::Tracker;
use crate::workitem::WorkItem;

struct Inner {
    engine: Arc<dyn Engine>,
    storage: Arc<dyn Storage>,
    behaviors: TaskRegistry,
    entities: EntityRegistry,
    audit: Arc<dyn AuditSink>,
    config: CoordinatorConfig,
}

/// Shared entry point to tasks, processes and trackers.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("behaviors", &self.inner.behaviors)
            .field("entities", &self.inner.entities)
            .field("audit", &self.inner.audit.name())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Coordinator {
    /// Starts building a coordinator over an engine and its store.
    pub fn builder(engine: Arc<dyn Engine>, storage: Arc<dyn Storage>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            engine,
            storage,
            config: CoordinatorConfig::default(),
            audit: None,
            behaviors: TaskRegistry::new(),
            entities: EntityRegistry::new(),
        }
    }

    /// The engine.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.inner.engine
    }

    /// The document store.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    /// The active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// The audit sink.
    pub fn audit_sink(&self) -> &Arc<dyn AuditSink> {
        &self.inner.audit
    }

    /// Entity finders.
    pub fn entities(&self) -> &EntityRegistry {
        &self.inner.entities
    }

    pub(crate) fn behavior_for(&self, nickname: Option<&str>) -> Arc<dyn TaskBehavior> {
        self.inner.behaviors.resolve(nickname)
    }

    pub(crate) async fn record(&self, entry: AuditEntry) {
        self.inner.audit.record(&entry).await;
    }

    /// Launches a process and returns its view.
    pub async fn launch(&self, definition: &str, fields: Map<String, Value>) -> Result<Process> {
        let wfid = self.inner.engine.launch(definition, fields).await?;
        tracing::debug!(wfid = %wfid, definition = %definition, "launched process");
        Ok(self.process(wfid))
    }

    /// Finds a task by work item id.
    ///
    /// # Errors
    ///
    /// [`Error::MissingWorkitem`] when no item has that id. Store failures
    /// are reported the same way, with the cause in `reason`.
    pub async fn task(&self, id: &str) -> Result<Task> {
        let document = self
            .inner
            .storage
            .get(DocKind::Workitems, id)
            .await
            .map_err(|e| Error::MissingWorkitem {
                id: id.to_string(),
                reason: Some(e.to_string()),
            })?
            .ok_or_else(|| Error::missing(id))?;
        Ok(Task::new(self.clone(), WorkItem::from_document(&document)?))
    }

    /// A fresh, unrestricted task finder.
    pub fn tasks(&self) -> TaskFinder {
        TaskFinder::new(self.clone())
    }

    /// A view over one process.
    pub fn process(&self, wfid: impl Into<String>) -> Process {
        Process::new(self.clone(), wfid.into())
    }

    /// The process lifecycle controller.
    pub fn processes(&self) -> ProcessController {
        ProcessController::new(self.clone())
    }

    /// Every live subscription, re-read from the engine.
    pub async fn trackers(&self) -> Result<Vec<Tracker>> {
        let records = self.inner.engine.trackers().await?;
        Ok(records
            .into_iter()
            .map(|(id, record)| Tracker::new(self.clone(), id, record))
            .collect())
    }

    /// One subscription by tracker id.
    pub async fn tracker(&self, id: &str) -> Result<Option<Tracker>> {
        let mut records = self.inner.engine.trackers().await?;
        Ok(records
            .shift_remove(id)
            .map(|record| Tracker::new(self.clone(), id.to_string(), record)))
    }

    /// Number of live subscriptions.
    pub async fn tracker_count(&self) -> Result<usize> {
        Ok(self.inner.engine.trackers().await?.len())
    }

    /// A participant that stores delivered items and dispatches them as
    /// tasks, to be registered with the engine.
    pub fn storage_participant(
        &self,
        handler: Option<Arc<dyn WorkHandler>>,
    ) -> Arc<StorageParticipant> {
        Arc::new(StorageParticipant::new(self.clone(), handler))
    }
}

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    engine: Arc<dyn Engine>,
    storage: Arc<dyn Storage>,
    config: CoordinatorConfig,
    audit: Option<Arc<dyn AuditSink>>,
    behaviors: TaskRegistry,
    entities: EntityRegistry,
}

impl CoordinatorBuilder {
    /// Replaces the default configuration.
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the audit sink, regardless of `audit_enabled`.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Registers the behavior for one task nickname.
    pub fn with_task_behavior(
        mut self,
        nickname: impl Into<String>,
        behavior: Arc<dyn TaskBehavior>,
    ) -> Self {
        self.behaviors.register(nickname, behavior);
        self
    }

    /// Registers the finder for one entity type.
    pub fn with_entity_finder(
        mut self,
        entity_type: impl Into<String>,
        finder: Arc<dyn EntityFinder>,
    ) -> Self {
        self.entities.register(entity_type, finder);
        self
    }

    /// Builds the coordinator.
    pub fn build(self) -> Coordinator {
        let audit = match self.audit {
            Some(sink) => sink,
            None if self.config.audit_enabled => Arc::new(TracingAuditSink) as Arc<dyn AuditSink>,
            None => Arc::new(NullAuditSink),
        };
        Coordinator {
            inner: Arc::new(Inner {
                engine: self.engine,
                storage: self.storage,
                behaviors: self.behaviors,
                entities: self.entities,
                audit,
                config: self.config,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::InMemoryEngine;
    use crate::store::GenericStorage;

    fn builder() -> CoordinatorBuilder {
        let storage: Arc<dyn Storage> = Arc::new(GenericStorage::in_memory());
        let engine = Arc::new(InMemoryEngine::new(storage.clone()));
        Coordinator::builder(engine, storage)
    }

    #[test]
    fn audit_sink_follows_config() {
        assert_eq!(builder().build().audit_sink().name(), "tracing");

        let disabled = CoordinatorConfig {
            audit_enabled: false,
            ..CoordinatorConfig::default()
        };
        assert_eq!(builder().with_config(disabled.clone()).build().audit_sink().name(), "null");

        let explicit = builder()
            .with_config(disabled)
            .with_audit_sink(Arc::new(crate::audit::MemoryAuditSink::new()))
            .build();
        assert_eq!(explicit.audit_sink().name(), "memory");
    }

    #[tokio::test]
    async fn task_lookup_reports_missing_items() {
        let coordinator = builder().build();
        let err = coordinator.task("nope").await.unwrap_err();
        assert!(matches!(err, Error::MissingWorkitem { ref id, reason: None } if id == "nope"));
    }

    #[tokio::test]
    async fn launching_unknown_definition_surfaces_engine_error() {
        let coordinator = builder().build();
        let err = coordinator.launch("nope", Map::new()).await.unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
    }
}
