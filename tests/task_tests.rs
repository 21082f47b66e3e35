//! Task transitions end to end: dispatch, claim, release, update, complete.

mod common;

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Map};

use hivework::engine::memory::InMemoryEngine;
use hivework::store::memory::InMemoryBackend;
use hivework::{
    AuditAction, Coordinator, DocKind, Document, Entity, EntityFinder, Error, ErrorKind,
    GenericStorage, Metadata, Participant, Storage, StorageError, Task, TaskBehavior,
    WorkHandler, WorkItem,
};

use common::Harness;

// ─── Fixtures ───────────────────────────────────────────────────────────────

/// Records the order hooks run in.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<&'static str>>,
    fail_before_complete: bool,
}

impl Recorder {
    fn failing() -> Self {
        Self {
            fail_before_complete: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TaskBehavior for Recorder {
    async fn before_update(&self, _: &mut Task, _: &Metadata) -> anyhow::Result<()> {
        self.calls.lock().push("before_update");
        Ok(())
    }

    async fn after_update(&self, _: &mut Task, _: &Metadata) -> anyhow::Result<()> {
        self.calls.lock().push("after_update");
        Ok(())
    }

    async fn before_complete(&self, _: &mut Task, _: &Metadata) -> anyhow::Result<()> {
        self.calls.lock().push("before_complete");
        if self.fail_before_complete {
            return Err(anyhow!("cud still chewy"));
        }
        Ok(())
    }

    async fn after_complete(&self, _: &mut Task, _: &Metadata) -> anyhow::Result<()> {
        self.calls.lock().push("after_complete");
        Ok(())
    }

    async fn after_dispatch(&self, task: &mut Task) -> anyhow::Result<()> {
        self.calls.lock().push("after_dispatch");
        task.set("dispatched", json!(true));
        Ok(())
    }
}

#[derive(Debug)]
struct RainbowLoom {
    id: String,
}

impl Entity for RainbowLoom {
    fn entity_type(&self) -> &str {
        "RainbowLoom"
    }

    fn identifier(&self) -> String {
        self.id.clone()
    }
}

struct Looms;

#[async_trait]
impl EntityFinder for Looms {
    async fn first_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<Arc<dyn Entity>>> {
        Ok((identifier == "12").then(|| {
            Arc::new(RainbowLoom {
                id: identifier.to_string(),
            }) as Arc<dyn Entity>
        }))
    }
}

async fn first_task(harness: &Harness) -> Task {
    harness.coordinator.tasks().first().await.unwrap().unwrap()
}

// ─── Claims ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn claim_conflict_names_current_claimant() {
    let harness = Harness::new();
    harness.coordinator.launch("do_nothing", Map::new()).await.unwrap();

    let mut alice = first_task(&harness).await;
    let mut bob = first_task(&harness).await;
    alice.claim("alice").await.unwrap();

    // Bob's copy is stale and still reads unclaimed; reload before claiming.
    bob.reload().await.unwrap();
    let err = bob.claim("bob").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("alice"));

    let found = harness.coordinator.tasks().for_claimant("alice").count().await.unwrap();
    assert_eq!(found, 1);
}

#[tokio::test]
async fn stale_claim_is_last_write_wins() {
    let harness = Harness::new();
    harness.coordinator.launch("do_nothing", Map::new()).await.unwrap();

    let mut first = first_task(&harness).await;
    let mut second = first_task(&harness).await;
    first.claim("alice").await.unwrap();
    second.claim("bob").await.unwrap();

    let stored = harness.coordinator.task(first.id()).await.unwrap();
    assert_eq!(stored.claimant(), Some("bob"));
}

#[tokio::test]
async fn release_clears_claim_in_store() {
    let harness = Harness::new();
    harness.coordinator.launch("do_nothing", Map::new()).await.unwrap();
    let mut task = first_task(&harness).await;

    task.claim("alice").await.unwrap();
    task.release().await.unwrap();

    let stored = harness.coordinator.task(task.id()).await.unwrap();
    assert!(!stored.is_claimed());
    assert_eq!(stored.claimed_at(), None);
    assert_eq!(
        harness.audit.actions(),
        vec![AuditAction::Dispatch, AuditAction::Claim, AuditAction::Release]
    );
}

/// Lets a rival claimant write between an exclusive claim's read and write.
struct RacingStorage {
    inner: GenericStorage<InMemoryBackend>,
}

#[async_trait]
impl Storage for RacingStorage {
    async fn get(&self, kind: DocKind, id: &str) -> Result<Option<Document>, StorageError> {
        self.inner.get(kind, id).await
    }

    async fn get_versioned(
        &self,
        kind: DocKind,
        id: &str,
    ) -> Result<Option<(Document, u64)>, StorageError> {
        let read = self.inner.get_versioned(kind, id).await?;
        if let Some((document, _)) = &read {
            let mut rival = WorkItem::from_document(document)
                .map_err(|e| StorageError::backend(e.to_string()))?;
            rival.params.insert("claimant".to_string(), json!("rival"));
            let document = rival
                .to_document()
                .map_err(|e| StorageError::backend(e.to_string()))?;
            self.inner.put(kind, &document).await?;
        }
        Ok(read)
    }

    async fn get_many(
        &self,
        kind: DocKind,
        wfids: Option<&[String]>,
    ) -> Result<Vec<Document>, StorageError> {
        self.inner.get_many(kind, wfids).await
    }

    async fn put(&self, kind: DocKind, document: &Document) -> Result<u64, StorageError> {
        self.inner.put(kind, document).await
    }

    async fn put_if_version(
        &self,
        kind: DocKind,
        document: &Document,
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        self.inner.put_if_version(kind, document, expected_version).await
    }

    async fn delete(&self, kind: DocKind, id: &str) -> Result<bool, StorageError> {
        self.inner.delete(kind, id).await
    }

    async fn remove_process(&self, wfid: &str) -> Result<usize, StorageError> {
        self.inner.remove_process(wfid).await
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        self.inner.clear().await
    }
}

#[tokio::test]
async fn exclusive_claim_loses_a_race_instead_of_overwriting() {
    let storage = Arc::new(RacingStorage {
        inner: GenericStorage::in_memory(),
    });
    let engine = Arc::new(InMemoryEngine::new(storage.clone()));
    let coordinator = Coordinator::builder(engine, storage.clone()).build();
    let item = WorkItem::new("wf", "bob").with_task("chew_cud");
    storage
        .put(DocKind::Workitems, &item.to_document().unwrap())
        .await
        .unwrap();

    let mut task = coordinator.task(&item.id).await.unwrap();
    let err = task.claim_exclusive("alice").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(err, Error::StaleClaim { .. }));

    let stored = coordinator.task(&item.id).await.unwrap();
    assert_eq!(stored.claimant(), Some("rival"));
}

// ─── Update & Complete ──────────────────────────────────────────────────────

#[tokio::test]
async fn complete_runs_hooks_in_order_and_advances() {
    let recorder = Arc::new(Recorder::default());
    let behavior = recorder.clone();
    let harness = Harness::build(|b| b.with_task_behavior("chew_cud", behavior), |e| e);

    let process = harness.coordinator.launch("chores", Map::new()).await.unwrap();
    let mut task = process.tasks().first().await.unwrap().unwrap();
    assert_eq!(task.nickname(), Some("chew_cud"));
    assert_eq!(task.get("dispatched"), None, "after_dispatch changes are not persisted");

    task.set("chewed", json!(true));
    task.complete(Metadata::new()).await.unwrap();

    assert_eq!(
        recorder.calls(),
        vec![
            "after_dispatch",
            "before_update",
            "before_complete",
            "after_complete",
            "after_update"
        ]
    );

    let next = process.tasks().first().await.unwrap().unwrap();
    assert_eq!(next.nickname(), Some("eat_grass"));
    assert_eq!(next.role(), "carol");
    assert_eq!(next.get("chewed"), Some(&json!(true)));
}

#[tokio::test]
async fn failing_hook_aborts_completion() {
    let recorder = Arc::new(Recorder::failing());
    let behavior = recorder.clone();
    let harness = Harness::build(|b| b.with_task_behavior("chew_cud", behavior), |e| e);

    harness.coordinator.launch("chores", Map::new()).await.unwrap();
    let mut task = first_task(&harness).await;
    let err = task.complete(Metadata::new()).await.unwrap_err();

    assert!(matches!(err, Error::Hook { hook: "before_complete", .. }));
    assert!(harness.coordinator.task(task.id()).await.is_ok());
    assert!(!harness.audit.actions().contains(&AuditAction::Complete));
}

#[tokio::test]
async fn update_persists_without_advancing() {
    let harness = Harness::new();
    let process = harness.coordinator.launch("chores", Map::new()).await.unwrap();
    let mut task = first_task(&harness).await;

    task.set("progress", json!(50));
    task.update(Metadata::new()).await.unwrap();

    let stored = harness.coordinator.task(task.id()).await.unwrap();
    assert_eq!(stored.get("progress"), Some(&json!(50)));
    assert_eq!(stored.nickname(), Some("chew_cud"));
    assert!(process.is_live().await.unwrap());

    let update = harness.audit.entries().pop().unwrap();
    assert_eq!(update.action, AuditAction::Update);
    assert_eq!(update.metadata["current_fields"]["progress"], json!(50));
}

#[tokio::test]
async fn completing_last_task_finishes_process() {
    let harness = Harness::new();
    let process = harness.coordinator.launch("do_nothing", Map::new()).await.unwrap();
    let mut task = first_task(&harness).await;

    task.complete(Metadata::new()).await.unwrap();
    assert!(!process.is_live().await.unwrap());

    let err = task.complete(Metadata::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ─── Entities ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn entity_resolves_through_registered_finder() {
    let harness = Harness::build(|b| b.with_entity_finder("RainbowLoom", Arc::new(Looms)), |e| e);
    let mut fields = Map::new();
    fields.insert("entity_type".to_string(), json!("RainbowLoom"));
    fields.insert("entity_id".to_string(), json!(12));
    harness.coordinator.launch("do_nothing", fields).await.unwrap();

    let task = first_task(&harness).await;
    assert!(task.has_entity_fields());
    let entity = task.entity().await.unwrap();
    assert_eq!(entity.identifier(), "12");

    let by_entity = harness
        .coordinator
        .tasks()
        .for_entity(&entity)
        .count()
        .await
        .unwrap();
    assert_eq!(by_entity, 1);
}

#[tokio::test]
async fn entity_lookup_miss_is_not_found() {
    let harness = Harness::build(|b| b.with_entity_finder("RainbowLoom", Arc::new(Looms)), |e| e);
    let mut fields = Map::new();
    fields.insert("entity_type".to_string(), json!("RainbowLoom"));
    fields.insert("entity_id".to_string(), json!("99"));
    harness.coordinator.launch("do_nothing", fields).await.unwrap();

    let task = first_task(&harness).await;
    assert!(task.has_entity_fields());
    assert!(!task.has_entity().await);
    assert!(matches!(task.entity().await, Err(Error::EntityNotFound { .. })));
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

struct ClaimOnArrival;

#[async_trait]
impl WorkHandler for ClaimOnArrival {
    async fn work(&self, mut task: Task) -> anyhow::Result<()> {
        task.claim("robot").await?;
        Ok(())
    }
}

#[tokio::test]
async fn storage_participant_dispatches_once_then_works() {
    let harness = Harness::new();
    let participant: Arc<dyn Participant> = harness
        .coordinator
        .storage_participant(Some(Arc::new(ClaimOnArrival)));
    harness.engine.register_participant(&participant);

    harness.coordinator.launch("do_nothing", Map::new()).await.unwrap();

    let task = first_task(&harness).await;
    assert_eq!(task.claimant(), Some("robot"));
    assert_eq!(
        harness.audit.actions(),
        vec![AuditAction::Dispatch, AuditAction::Claim]
    );
}
