//! In-memory reference engine.
//!
//! [`InMemoryEngine`] interprets a deliberately small process language: a
//! [`ProcessDefinition`] is a sequence of [`Step`]s, each either a dispatch
//! of a work item to a participant or a concurrent set of tag
//! [`Subscription`]s. All state (process records, work items, trackers)
//! lives in the shared [`Storage`], so a `remove_process` or `clear` issued
//! against the store is observed by the engine on its next read.
//!
//! Termination is deliberately not immediate. `cancel` keeps the process
//! visible for its `on_cancel` teardown plus the configured termination
//! latency; `kill` only waits out the latency. Re-sent directives never
//! push a deadline later, so repeated cancels converge.

use std::cmp::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::PARAM_TASK;
use crate::engine::{Engine, EngineError, Expression, ProcessStatus};
use crate::participant::Participant;
use crate::store::{DocKind, Document, Storage, StorageError};
use crate::workitem::WorkItem;

/// Whether a subscription listens to events from anywhere or only from its
/// own process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionScope {
    /// Matches events from any process; the tracker carries no `wfid`.
    Global,
    /// Matches events raised inside the subscribing process only.
    Process,
}

/// A tag subscription made by a paused branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Tag (event name) being awaited.
    pub tag: String,
    /// Scope of the subscription.
    pub scope: SubscriptionScope,
    /// Optional filter clause attached to the waiting expression.
    pub where_clause: Option<String>,
}

impl Subscription {
    /// A global event subscription.
    pub fn global(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            scope: SubscriptionScope::Global,
            where_clause: None,
        }
    }

    /// A subscription scoped to the subscribing process.
    pub fn local(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            scope: SubscriptionScope::Process,
            where_clause: None,
        }
    }

    /// Attaches a `where` clause.
    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    fn tree(&self) -> Value {
        let mut attributes = Map::new();
        let name = match self.scope {
            SubscriptionScope::Global => {
                attributes.insert("tag".to_string(), json!(self.tag));
                "wait_for_event"
            },
            SubscriptionScope::Process => {
                attributes.insert("left_tag".to_string(), json!(self.tag));
                "await"
            },
        };
        if let Some(clause) = &self.where_clause {
            attributes.insert("where".to_string(), json!(clause));
        }
        json!([name, attributes, []])
    }
}

/// One step of a process definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Deliver a work item to a participant and wait for it to be proceeded.
    Dispatch {
        /// Receiving participant.
        participant: String,
        /// Task nickname; `None` for engine-internal items.
        task: Option<String>,
    },
    /// Park on a set of subscriptions until the process is terminated.
    Await(Vec<Subscription>),
}

impl Step {
    fn tree(&self) -> Value {
        match self {
            Self::Dispatch { participant, task } => {
                let mut attributes = Map::new();
                attributes.insert("ref".to_string(), json!(participant));
                if let Some(task) = task {
                    attributes.insert(PARAM_TASK.to_string(), json!(task));
                }
                json!(["participant", attributes, []])
            },
            Self::Await(subscriptions) => {
                let children: Vec<Value> = subscriptions.iter().map(Subscription::tree).collect();
                json!(["concurrence", {}, children])
            },
        }
    }
}

/// A named process definition.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hivework::engine::memory::{ProcessDefinition, Subscription};
///
/// let def = ProcessDefinition::new("going_to_the_dance")
///     .task("lazy_guy", "absolutely_nothing")
///     .await_all(vec![
///         Subscription::global("an_invitation"),
///         Subscription::local("a_friend"),
///     ])
///     .on_cancel(Duration::from_millis(200));
/// assert_eq!(def.steps.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessDefinition {
    /// Definition name used by `launch`.
    pub name: String,
    /// Steps, run in order.
    pub steps: Vec<Step>,
    /// Teardown time of the on-cancel branch, if the definition has one.
    pub on_cancel: Option<Duration>,
}

impl ProcessDefinition {
    /// An empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            on_cancel: None,
        }
    }

    /// Appends a task dispatch.
    pub fn task(mut self, participant: impl Into<String>, nickname: impl Into<String>) -> Self {
        self.steps.push(Step::Dispatch {
            participant: participant.into(),
            task: Some(nickname.into()),
        });
        self
    }

    /// Appends a dispatch of a plain (non-task) work item.
    pub fn participant(mut self, participant: impl Into<String>) -> Self {
        self.steps.push(Step::Dispatch {
            participant: participant.into(),
            task: None,
        });
        self
    }

    /// Appends a concurrent set of subscriptions.
    pub fn await_all(mut self, subscriptions: Vec<Subscription>) -> Self {
        self.steps.push(Step::Await(subscriptions));
        self
    }

    /// Sets the on-cancel teardown time.
    pub fn on_cancel(mut self, teardown: Duration) -> Self {
        self.on_cancel = Some(teardown);
        self
    }

    fn expressions(&self, step: usize) -> Vec<Expression> {
        let mut expressions = vec![Expression {
            expid: "0".to_string(),
            tree: json!(["define", { "name": self.name }, []]),
        }];
        if let Some(current) = self.steps.get(step) {
            let expid = format!("0_{step}");
            if let Step::Await(subscriptions) = current {
                expressions.push(Expression {
                    expid: expid.clone(),
                    tree: current.tree(),
                });
                for (i, subscription) in subscriptions.iter().enumerate() {
                    expressions.push(Expression {
                        expid: format!("{expid}_{i}"),
                        tree: subscription.tree(),
                    });
                }
            } else {
                expressions.push(Expression {
                    expid,
                    tree: current.tree(),
                });
            }
        }
        expressions
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessRecord {
    wfid: String,
    definition_name: String,
    step: usize,
    #[serde(default)]
    fields: Map<String, Value>,
    launched_at: DateTime<Utc>,
    #[serde(default)]
    terminate_at: Option<DateTime<Utc>>,
}

impl ProcessRecord {
    fn is_terminated(&self, now: DateTime<Utc>) -> bool {
        self.terminate_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Cancel,
    Kill,
}

/// Reference engine over a shared [`Storage`].
pub struct InMemoryEngine {
    storage: Arc<dyn Storage>,
    definitions: DashMap<String, ProcessDefinition>,
    participant: RwLock<Option<Weak<dyn Participant>>>,
    termination_latency: Duration,
}

impl std::fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("definitions", &self.definitions.len())
            .field("termination_latency", &self.termination_latency)
            .finish()
    }
}

impl InMemoryEngine {
    /// Creates an engine storing its state in `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            definitions: DashMap::new(),
            participant: RwLock::new(None),
            termination_latency: Duration::ZERO,
        }
    }

    /// Keeps terminated processes visible for `latency` after a directive.
    pub fn with_termination_latency(mut self, latency: Duration) -> Self {
        self.termination_latency = latency;
        self
    }

    /// Registers (or replaces) a process definition.
    pub fn define(&self, definition: ProcessDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    /// Routes new work items through `participant`.
    ///
    /// The engine holds the participant weakly; the caller keeps it alive.
    /// Without a live participant, work items are stored directly.
    pub fn register_participant(&self, participant: &Arc<dyn Participant>) {
        *self.participant.write() = Some(Arc::downgrade(participant));
    }

    fn definition(&self, name: &str) -> Option<ProcessDefinition> {
        self.definitions.get(name).map(|d| d.value().clone())
    }

    fn to_deadline(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| from.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn encode<T: Serialize>(id: &str, value: &T) -> Result<Value, EngineError> {
        serde_json::to_value(value).map_err(|e| {
            EngineError::Storage(StorageError::Backend {
                message: format!("failed to encode {id}"),
                source: Some(Box::new(e)),
            })
        })
    }

    async fn save(&self, record: &ProcessRecord) -> Result<(), EngineError> {
        let body = Self::encode(&record.wfid, record)?;
        self.storage
            .put(
                DocKind::Processes,
                &Document::new(record.wfid.clone(), Some(record.wfid.clone()), body),
            )
            .await?;
        Ok(())
    }

    /// Loads a live record, sweeping it if its termination deadline passed.
    async fn load(&self, wfid: &str) -> Result<Option<ProcessRecord>, EngineError> {
        let Some(document) = self.storage.get(DocKind::Processes, wfid).await? else {
            return Ok(None);
        };
        let record: ProcessRecord = match serde_json::from_value(document.body) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(wfid = %wfid, error = %e, "undecodable process record");
                return Ok(None);
            },
        };
        if record.is_terminated(Utc::now()) {
            self.storage.remove_process(wfid).await?;
            tracing::debug!(wfid = %wfid, "process terminated");
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn deliver(&self, workitem: WorkItem) -> Result<(), EngineError> {
        let participant = self.participant.read().as_ref().and_then(Weak::upgrade);
        match participant {
            Some(participant) => {
                let id = workitem.id.clone();
                if let Err(e) = participant.on_workitem(workitem).await {
                    tracing::warn!(workitem_id = %id, error = %e, "participant failed on delivery");
                }
            },
            None => {
                let body = Self::encode(&workitem.id, &workitem)?;
                self.storage
                    .put(
                        DocKind::Workitems,
                        &Document::new(workitem.id.clone(), Some(workitem.wfid.clone()), body),
                    )
                    .await?;
            },
        }
        Ok(())
    }

    /// Runs the process from its current step until it parks or ends.
    async fn advance(
        &self,
        mut record: ProcessRecord,
        definition: &ProcessDefinition,
    ) -> Result<(), EngineError> {
        let Some(step) = definition.steps.get(record.step) else {
            self.storage.remove_process(&record.wfid).await?;
            tracing::debug!(wfid = %record.wfid, "process finished");
            return Ok(());
        };
        self.save(&record).await?;
        match step {
            Step::Dispatch { participant, task } => {
                let mut workitem = WorkItem::new(record.wfid.clone(), participant.clone());
                workitem.definition_name = Some(definition.name.clone());
                workitem.fields = std::mem::take(&mut record.fields);
                if let Some(task) = task {
                    workitem = workitem.with_task(task.clone());
                }
                self.deliver(workitem).await?;
            },
            Step::Await(subscriptions) => {
                for (i, subscription) in subscriptions.iter().enumerate() {
                    let expid = format!("0_{}_{i}", record.step);
                    let id = format!("{expid}!{}", record.wfid);
                    let scoped_wfid = match subscription.scope {
                        SubscriptionScope::Global => Value::Null,
                        SubscriptionScope::Process => json!(record.wfid),
                    };
                    let body = json!({
                        "id": id,
                        "wfid": scoped_wfid,
                        "action": "left_tag",
                        "conditions": { "tag": [subscription.tag] },
                        "msg": {
                            "action": "reply",
                            "fei": { "wfid": record.wfid, "expid": expid },
                        },
                    });
                    self.storage
                        .put(
                            DocKind::Trackers,
                            &Document::new(id.clone(), Some(record.wfid.clone()), body),
                        )
                        .await?;
                }
            },
        }
        Ok(())
    }

    async fn terminate(&self, wfid: &str, directive: Directive) -> Result<(), EngineError> {
        let Some(mut record) = self.load(wfid).await? else {
            return Ok(());
        };
        let now = Utc::now();
        let teardown = match directive {
            Directive::Cancel => self
                .definition(&record.definition_name)
                .and_then(|d| d.on_cancel)
                .unwrap_or_default(),
            Directive::Kill => Duration::ZERO,
        };
        let requested = Self::to_deadline(now, self.termination_latency + teardown);
        let deadline = match record.terminate_at {
            Some(existing) => existing.min(requested),
            None => requested,
        };

        let wfids = [wfid.to_string()];
        for kind in [DocKind::Workitems, DocKind::Trackers] {
            for document in self.storage.get_many(kind, Some(&wfids)).await? {
                self.storage.delete(kind, &document.id).await?;
            }
        }

        if deadline <= now {
            self.storage.remove_process(wfid).await?;
        } else {
            record.terminate_at = Some(deadline);
            self.save(&record).await?;
        }
        tracing::debug!(wfid = %wfid, ?directive, %deadline, "termination requested");
        Ok(())
    }
}

#[async_trait]
impl Engine for InMemoryEngine {
    async fn launch(
        &self,
        definition: &str,
        fields: Map<String, Value>,
    ) -> Result<String, EngineError> {
        let definition = self
            .definition(definition)
            .ok_or_else(|| EngineError::UnknownDefinition(definition.to_string()))?;
        let record = ProcessRecord {
            wfid: uuid::Uuid::new_v4().to_string(),
            definition_name: definition.name.clone(),
            step: 0,
            fields,
            launched_at: Utc::now(),
            terminate_at: None,
        };
        let wfid = record.wfid.clone();
        tracing::debug!(wfid = %wfid, definition = %definition.name, "launching process");
        self.advance(record, &definition).await?;
        Ok(wfid)
    }

    async fn cancel(&self, wfid: &str) -> Result<(), EngineError> {
        self.terminate(wfid, Directive::Cancel).await
    }

    async fn kill(&self, wfid: &str) -> Result<(), EngineError> {
        self.terminate(wfid, Directive::Kill).await
    }

    async fn process(&self, wfid: &str) -> Result<Option<ProcessStatus>, EngineError> {
        let Some(record) = self.load(wfid).await? else {
            return Ok(None);
        };
        let expressions = match self.definition(&record.definition_name) {
            Some(definition) if record.terminate_at.is_none() => {
                definition.expressions(record.step)
            },
            _ => Vec::new(),
        };
        Ok(Some(ProcessStatus {
            wfid: record.wfid,
            definition_name: record.definition_name,
            expressions,
            launched_at: record.launched_at,
        }))
    }

    async fn process_ids(&self) -> Result<Vec<String>, EngineError> {
        let now = Utc::now();
        let mut live = Vec::new();
        for document in self.storage.get_many(DocKind::Processes, None).await? {
            let Ok(record) = serde_json::from_value::<ProcessRecord>(document.body) else {
                continue;
            };
            if record.is_terminated(now) {
                self.storage.remove_process(&record.wfid).await?;
                continue;
            }
            live.push(record);
        }
        live.sort_by(|a, b| match a.launched_at.cmp(&b.launched_at) {
            Ordering::Equal => a.wfid.cmp(&b.wfid),
            other => other,
        });
        Ok(live.into_iter().map(|r| r.wfid).collect())
    }

    async fn trackers(&self) -> Result<IndexMap<String, Value>, EngineError> {
        let mut documents = self.storage.get_many(DocKind::Trackers, None).await?;
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents.into_iter().map(|d| (d.id, d.body)).collect())
    }

    async fn proceed(&self, workitem: &WorkItem) -> Result<(), EngineError> {
        if !self.storage.delete(DocKind::Workitems, &workitem.id).await? {
            return Err(EngineError::WorkitemGone(workitem.id.clone()));
        }
        let Some(mut record) = self.load(&workitem.wfid).await? else {
            return Err(EngineError::WorkitemGone(workitem.id.clone()));
        };
        if record.terminate_at.is_some() {
            return Ok(());
        }
        let Some(definition) = self.definition(&record.definition_name) else {
            return Err(EngineError::UnknownDefinition(record.definition_name));
        };
        record.fields = workitem.fields.clone();
        record.step += 1;
        self.advance(record, &definition).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GenericStorage;

    fn engine() -> (Arc<dyn Storage>, InMemoryEngine) {
        let storage: Arc<dyn Storage> = Arc::new(GenericStorage::in_memory());
        let engine = InMemoryEngine::new(storage.clone());
        engine.define(
            ProcessDefinition::new("two_steps")
                .task("bob", "first")
                .task("carol", "second"),
        );
        engine.define(
            ProcessDefinition::new("waiting")
                .await_all(vec![
                    Subscription::global("an_invitation"),
                    Subscription::local("a_friend").with_where("${f:friendly}"),
                ])
                .on_cancel(Duration::from_millis(300)),
        );
        (storage, engine)
    }

    async fn workitems(storage: &Arc<dyn Storage>) -> Vec<WorkItem> {
        storage
            .get_many(DocKind::Workitems, None)
            .await
            .unwrap()
            .iter()
            .map(|d| WorkItem::from_document(d).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn launch_unknown_definition_fails() {
        let (_, engine) = engine();
        let err = engine.launch("nope", Map::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownDefinition(name) if name == "nope"));
    }

    #[tokio::test]
    async fn proceed_advances_and_carries_fields() {
        let (storage, engine) = engine();
        let mut fields = Map::new();
        fields.insert("color".to_string(), json!("blue"));
        let wfid = engine.launch("two_steps", fields).await.unwrap();

        let mut items = workitems(&storage).await;
        assert_eq!(items.len(), 1);
        let mut first = items.remove(0);
        assert_eq!(first.nickname(), Some("first"));
        assert_eq!(first.fields["color"], json!("blue"));

        first.fields.insert("done".to_string(), json!(true));
        engine.proceed(&first).await.unwrap();
        let items = workitems(&storage).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].participant_name, "carol");
        assert_eq!(items[0].fields["done"], json!(true));

        engine.proceed(&items[0]).await.unwrap();
        assert!(engine.process(&wfid).await.unwrap().is_none());
        assert!(matches!(
            engine.proceed(&items[0]).await,
            Err(EngineError::WorkitemGone(_))
        ));
    }

    #[tokio::test]
    async fn await_step_registers_trackers_and_expressions() {
        let (_, engine) = engine();
        let wfid = engine.launch("waiting", Map::new()).await.unwrap();

        let trackers = engine.trackers().await.unwrap();
        assert_eq!(trackers.len(), 2);
        let scoped: Vec<&Value> = trackers.values().filter(|t| !t["wfid"].is_null()).collect();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0]["wfid"], json!(wfid));

        let status = engine.process(&wfid).await.unwrap().unwrap();
        let local = status.expression("0_0_1").unwrap();
        assert_eq!(local.name(), Some("await"));
        assert_eq!(local.attributes().unwrap()["where"], json!("${f:friendly}"));
    }

    #[tokio::test]
    async fn cancel_waits_for_teardown_but_kill_does_not() {
        let (_, engine) = engine();
        let cancelled = engine.launch("waiting", Map::new()).await.unwrap();
        let killed = engine.launch("waiting", Map::new()).await.unwrap();

        engine.cancel(&cancelled).await.unwrap();
        engine.kill(&killed).await.unwrap();

        assert!(engine.process(&killed).await.unwrap().is_none());
        assert!(engine.process(&cancelled).await.unwrap().is_some());
        assert!(engine.trackers().await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(engine.process(&cancelled).await.unwrap().is_none());
        assert!(engine.process_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_cancel_never_extends_deadline() {
        let (_, engine) = engine();
        let wfid = engine.launch("waiting", Map::new()).await.unwrap();
        engine.cancel(&wfid).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.cancel(&wfid).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(engine.process(&wfid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_clear_is_observed() {
        let (storage, engine) = engine();
        engine.launch("waiting", Map::new()).await.unwrap();
        engine.launch("two_steps", Map::new()).await.unwrap();
        assert_eq!(engine.process_ids().await.unwrap().len(), 2);
        storage.clear().await.unwrap();
        assert!(engine.process_ids().await.unwrap().is_empty());
    }
}
