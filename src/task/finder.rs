//! Composable task queries.
//!
//! A [`TaskFinder`] accumulates predicates (combined with AND) and an
//! optional process-id scope, then evaluates them against the store each
//! time a terminal method runs. Nothing is cached between evaluations.
//!
//! The scope is separate from the predicates: an explicitly empty process
//! list matches nothing and never reaches the store, while no scope scans
//! every work item. Predicates commute; the scope does not, since a later
//! `for_process`/`for_processes` replaces an earlier one.
//!
//! # Examples
//!
//! ```no_run
//! # async fn demo(coordinator: hivework::Coordinator) -> hivework::Result<()> {
//! use std::time::Duration;
//!
//! let task = coordinator
//!     .tasks()
//!     .for_role("bob")
//!     .unclaimed(true)
//!     .next_available(Some(Duration::from_secs(2)))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;

use crate::constants::{FIELD_ENTITY_ID, FIELD_ENTITY_TYPE};
use crate::coordinator::Coordinator;
use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::store::DocKind;
use crate::task::Task;
use crate::workitem::{identifier_of, WorkItem};

type Predicate = Arc<dyn Fn(&WorkItem) -> bool + Send + Sync>;

/// Builder and evaluator for task queries.
#[derive(Clone)]
pub struct TaskFinder {
    coordinator: Coordinator,
    predicates: Vec<Predicate>,
    process_ids: Option<Vec<String>>,
}

impl fmt::Debug for TaskFinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFinder")
            .field("predicates", &self.predicates.len())
            .field("process_ids", &self.process_ids)
            .finish()
    }
}

impl TaskFinder {
    /// An unrestricted finder. Only work items with a task nickname match.
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            predicates: Vec::new(),
            process_ids: None,
        }
    }

    /// Adds a custom predicate.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&WorkItem) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Tasks with this nickname.
    pub fn by_nickname(self, nickname: impl Into<String>) -> Self {
        let nickname = nickname.into();
        self.filter(move |w| w.nickname() == Some(nickname.as_str()))
    }

    /// Tasks held by this participant.
    pub fn for_role(self, role: impl Into<String>) -> Self {
        self.for_roles([role])
    }

    /// Tasks held by any of these participants. An empty list matches nothing.
    pub fn for_roles<I, S>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        self.filter(move |w| roles.iter().any(|r| *r == w.participant_name))
    }

    /// Tasks with no claimant, or with any claimant when `check` is false.
    pub fn unclaimed(self, check: bool) -> Self {
        if !check {
            return self.claimed();
        }
        self.filter(|w| w.claimant().map_or(true, str::is_empty))
    }

    /// Tasks with any claimant.
    pub fn claimed(self) -> Self {
        self.filter(|w| w.claimant().is_some_and(|c| !c.is_empty()))
    }

    /// Tasks claimed by this token.
    pub fn for_claimant(self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.filter(move |w| w.claimant() == Some(token.as_str()))
    }

    /// Tasks about this entity, matched on the `entity_type`/`entity_id` fields.
    pub fn for_entity(self, entity: impl Into<EntityRef>) -> Self {
        let entity = entity.into();
        self.filter(move |w| {
            w.fields.get(FIELD_ENTITY_TYPE).and_then(Value::as_str)
                == Some(entity.entity_type.as_str())
                && w.fields.get(FIELD_ENTITY_ID).and_then(identifier_of).as_deref()
                    == Some(entity.entity_id.as_str())
        })
    }

    /// Restricts the scan to one process, given by id or [`Process`](crate::Process) handle.
    pub fn for_process(self, process: impl AsRef<str>) -> Self {
        self.for_processes([process])
    }

    /// Restricts the scan to these processes, given by id or
    /// [`Process`](crate::Process) handle. An empty list yields no tasks without reading the store.
    ///
    /// The scope is last-wins: this replaces any earlier `for_process` or
    /// `for_processes` call instead of intersecting with it. Unlike
    /// predicates, two different scopes therefore depend on call order.
    pub fn for_processes<I, S>(mut self, processes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.process_ids = Some(
            processes
                .into_iter()
                .map(|p| p.as_ref().to_string())
                .collect(),
        );
        self
    }

    /// Whether a work item passes the base predicate and every added one.
    pub fn matches(&self, workitem: &WorkItem) -> bool {
        workitem.nickname().is_some() && self.predicates.iter().all(|p| p(workitem))
    }

    /// Every matching task, in store order.
    pub async fn all(&self) -> Result<Vec<Task>> {
        let documents = match &self.process_ids {
            Some(wfids) if wfids.is_empty() => return Ok(Vec::new()),
            Some(wfids) => {
                self.coordinator
                    .storage()
                    .get_many(DocKind::Workitems, Some(wfids.as_slice()))
                    .await?
            },
            None => {
                self.coordinator
                    .storage()
                    .get_many(DocKind::Workitems, None)
                    .await?
            },
        };

        let mut tasks = Vec::new();
        for document in &documents {
            let workitem = match WorkItem::from_document(document) {
                Ok(workitem) => workitem,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable workitem");
                    continue;
                },
            };
            if self.matches(&workitem) {
                tasks.push(Task::new(self.coordinator.clone(), workitem));
            }
        }
        Ok(tasks)
    }

    /// The first matching task, if any.
    pub async fn first(&self) -> Result<Option<Task>> {
        Ok(self.all().await?.into_iter().next())
    }

    /// Number of matching tasks.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    /// Whether nothing matches.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.all().await?.is_empty())
    }

    /// Lazily evaluates the query when first polled. Each call re-queries.
    pub fn stream(&self) -> BoxStream<'static, Result<Task>> {
        let finder = self.clone();
        stream::once(async move { finder.all().await })
            .map(|result| match result {
                Ok(tasks) => tasks.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            })
            .flat_map(stream::iter)
            .boxed()
    }

    /// Waits for the first matching task, re-querying every
    /// `availability_poll_interval` until `timeout` (default: the configured
    /// timeout) elapses.
    ///
    /// Dropping the returned future abandons the wait.
    ///
    /// # Errors
    ///
    /// [`Error::AvailabilityTimeout`] when nothing matched in time.
    pub async fn next_available(&self, timeout: Option<Duration>) -> Result<Task> {
        let config = self.coordinator.config();
        let timeout = timeout.unwrap_or_else(|| config.timeout());
        let interval = config.availability_poll_interval();
        let started = Instant::now();

        loop {
            if let Some(task) = self.first().await? {
                return Ok(task);
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "no task became available");
                return Err(Error::AvailabilityTimeout { timeout });
            }
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::InMemoryEngine;
    use crate::store::{GenericStorage, Storage};
    use serde_json::json;

    async fn seeded() -> Coordinator {
        let storage: Arc<dyn Storage> = Arc::new(GenericStorage::in_memory());
        let engine = Arc::new(InMemoryEngine::new(storage.clone()));
        let coordinator = Coordinator::builder(engine, storage.clone()).build();
        let items = [
            WorkItem::new("wf-1", "bob").with_task("chew_cud"),
            WorkItem::new("wf-1", "bob").with_task("eat_grass"),
            WorkItem::new("wf-2", "carol")
                .with_task("chew_cud")
                .with_field(FIELD_ENTITY_TYPE, json!("Cow"))
                .with_field(FIELD_ENTITY_ID, json!(12)),
            WorkItem::new("wf-2", "carol"),
        ];
        for item in items {
            storage
                .put(DocKind::Workitems, &item.to_document().unwrap())
                .await
                .unwrap();
        }
        coordinator
    }

    #[tokio::test]
    async fn base_predicate_excludes_plain_workitems() {
        let coordinator = seeded().await;
        assert_eq!(coordinator.tasks().count().await.unwrap(), 3);
        assert_eq!(coordinator.tasks().for_role("carol").count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn predicates_and_scope_combine() {
        let coordinator = seeded().await;
        let finder = coordinator.tasks().by_nickname("chew_cud");
        assert_eq!(finder.count().await.unwrap(), 2);
        assert_eq!(finder.clone().for_process("wf-1").count().await.unwrap(), 1);
        assert!(finder.for_roles(Vec::<String>::new()).is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn unclaimed_false_means_claimed() {
        let coordinator = seeded().await;
        let mut task = coordinator.tasks().for_role("carol").first().await.unwrap().unwrap();
        task.claim("alice").await.unwrap();

        assert_eq!(coordinator.tasks().unclaimed(true).count().await.unwrap(), 2);
        let claimed = coordinator.tasks().unclaimed(false).all().await.unwrap();
        assert_eq!(claimed, vec![task]);
    }

    #[tokio::test]
    async fn later_scope_replaces_earlier_one() {
        let coordinator = seeded().await;
        let wf1 = coordinator.process("wf-1");
        let wf2 = coordinator.process("wf-2");

        let finder = coordinator.tasks().for_process(&wf1).for_process(&wf2);
        assert_eq!(finder.count().await.unwrap(), 1);
        let finder = coordinator.tasks().for_processes([&wf2, &wf1]);
        assert_eq!(finder.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn entity_matches_numeric_and_string_ids() {
        let coordinator = seeded().await;
        assert_eq!(coordinator.tasks().for_entity(("Cow", "12")).count().await.unwrap(), 1);
        assert!(coordinator.tasks().for_entity(("Pig", "12")).is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn stream_yields_every_match() {
        let coordinator = seeded().await;
        let ids: Vec<String> = coordinator
            .tasks()
            .for_process("wf-1")
            .stream()
            .map(|t| t.unwrap().id().to_string())
            .collect()
            .await;
        assert_eq!(ids.len(), 2);
    }
}
