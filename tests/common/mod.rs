//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hivework::engine::memory::{InMemoryEngine, ProcessDefinition, Subscription};
use hivework::{
    Coordinator, CoordinatorBuilder, CoordinatorConfig, Engine, EngineError, GenericStorage,
    MemoryAuditSink, Participant, ProcessStatus, Storage, WorkItem,
};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Cadence used by every harness; keeps timing tests fast.
pub const POLL: Duration = Duration::from_millis(20);

/// A coordinator wired to an in-memory engine and store, with a live
/// storage participant and a memory audit sink.
pub struct Harness {
    pub coordinator: Coordinator,
    pub engine: Arc<InMemoryEngine>,
    pub storage: Arc<dyn Storage>,
    pub audit: Arc<MemoryAuditSink>,
    participant: Arc<dyn Participant>,
}

pub fn config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_timeout(Duration::from_secs(2))
        .with_poll_interval(POLL)
}

/// Process definitions shared across tests.
pub fn define_fixtures(engine: &InMemoryEngine) {
    engine.define(ProcessDefinition::new("do_nothing").task("lazy_guy", "absolutely_nothing"));
    engine.define(
        ProcessDefinition::new("chores")
            .task("bob", "chew_cud")
            .task("carol", "eat_grass"),
    );
    engine.define(
        ProcessDefinition::new("time_hog")
            .task("pigheaded", "whatever")
            .on_cancel(Duration::from_secs(1)),
    );
    engine.define(
        ProcessDefinition::new("going_to_the_dance")
            .await_all(vec![
                Subscription::local("an_invitation"),
                Subscription::global("a_friend").with_where("${f:friendly}"),
            ])
            .on_cancel(Duration::from_millis(100)),
    );
}

impl Harness {
    pub fn new() -> Self {
        Self::build(|builder| builder, |engine| engine)
    }

    /// Builds a harness, letting the caller customise the coordinator and
    /// wrap the engine the coordinator talks to.
    pub fn build(
        customise: impl FnOnce(CoordinatorBuilder) -> CoordinatorBuilder,
        wrap: impl FnOnce(Arc<dyn Engine>) -> Arc<dyn Engine>,
    ) -> Self {
        Self::build_with_latency(Duration::ZERO, customise, wrap)
    }

    /// Like [`Harness::build`], with terminated processes lingering for
    /// `latency` before the engine stops reporting them.
    pub fn build_with_latency(
        latency: Duration,
        customise: impl FnOnce(CoordinatorBuilder) -> CoordinatorBuilder,
        wrap: impl FnOnce(Arc<dyn Engine>) -> Arc<dyn Engine>,
    ) -> Self {
        let storage: Arc<dyn Storage> = Arc::new(GenericStorage::in_memory());
        let engine =
            Arc::new(InMemoryEngine::new(storage.clone()).with_termination_latency(latency));
        define_fixtures(&engine);

        let audit = Arc::new(MemoryAuditSink::new());
        let base: Arc<dyn Engine> = engine.clone();
        let builder = Coordinator::builder(wrap(base), storage.clone())
            .with_config(config())
            .with_audit_sink(audit.clone());
        let coordinator = customise(builder).build();

        let participant: Arc<dyn Participant> = coordinator.storage_participant(None);
        engine.register_participant(&participant);

        Self {
            coordinator,
            engine,
            storage,
            audit,
            participant,
        }
    }

    /// Launches `definition` `n` times and returns the process ids.
    pub async fn launch_many(&self, definition: &str, n: usize) -> Vec<String> {
        let mut wfids = Vec::with_capacity(n);
        for _ in 0..n {
            let process = self.coordinator.launch(definition, Map::new()).await.unwrap();
            wfids.push(process.wfid().to_string());
        }
        wfids
    }

    pub async fn live_count(&self) -> usize {
        self.engine.process_ids().await.unwrap().len()
    }
}

/// Engine stub that reports a fixed set of processes and trackers forever,
/// ignoring directives. Stands in for an unresponsive engine.
#[derive(Debug, Default)]
pub struct StubbornEngine {
    pub live: Vec<String>,
    pub trackers: IndexMap<String, Value>,
}

#[async_trait]
impl Engine for StubbornEngine {
    async fn launch(&self, definition: &str, _: Map<String, Value>) -> Result<String, EngineError> {
        Err(EngineError::UnknownDefinition(definition.to_string()))
    }

    async fn cancel(&self, _: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn kill(&self, _: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn process(&self, wfid: &str) -> Result<Option<ProcessStatus>, EngineError> {
        Ok(self.live.iter().any(|w| w == wfid).then(|| ProcessStatus {
            wfid: wfid.to_string(),
            definition_name: "immortal".to_string(),
            expressions: Vec::new(),
            launched_at: chrono::Utc::now(),
        }))
    }

    async fn process_ids(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.live.clone())
    }

    async fn trackers(&self) -> Result<IndexMap<String, Value>, EngineError> {
        Ok(self.trackers.clone())
    }

    async fn proceed(&self, workitem: &WorkItem) -> Result<(), EngineError> {
        Err(EngineError::WorkitemGone(workitem.id.clone()))
    }
}

/// A coordinator over a stub engine and a fresh store.
pub fn stub_coordinator(engine: StubbornEngine) -> (Coordinator, Arc<dyn Storage>) {
    let storage: Arc<dyn Storage> = Arc::new(GenericStorage::in_memory());
    let coordinator = Coordinator::builder(Arc::new(engine), storage.clone())
        .with_config(config())
        .build();
    (coordinator, storage)
}
