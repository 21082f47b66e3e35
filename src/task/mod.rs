//! Tasks: work items that carry a task nickname.
//!
//! A [`Task`] is a view over exactly one [`WorkItem`]. It owns the claim,
//! release, update and complete transitions. Each mutating method writes
//! the whole item back to the store before returning, so a task observes
//! its own writes.
//!
//! # Claims are advisory
//!
//! The claim lives in the work item's params (`claimant`, `claimed_at`)
//! and is checked against this task's in-memory copy only. Two workers
//! holding stale copies of the same unclaimed item can both claim it; the
//! later write wins. Call [`Task::reload`] before claiming when that
//! matters, and treat [`Error::AlreadyClaimed`] as advisory.
//!
//! [`Task::claim_exclusive`] is the opt-in alternative: it re-reads the
//! stored item and writes the claim with a version check, so of two racing
//! claimants exactly one wins and the other gets a conflict.

pub mod behavior;
pub mod finder;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::audit::{AuditAction, AuditEntry};
use crate::constants::{FIELD_ENTITY_ID, FIELD_ENTITY_TYPE, META_CURRENT_FIELDS};
use crate::coordinator::Coordinator;
use crate::engine::EngineError;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::process::Process;
use crate::store::{DocKind, StorageError};
use crate::workitem::{identifier_of, WorkItem};

use self::behavior::{Metadata, TaskBehavior};

/// A view over one task work item.
#[derive(Clone)]
pub struct Task {
    coordinator: Coordinator,
    workitem: WorkItem,
    behavior: Arc<dyn TaskBehavior>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.workitem.id)
            .field("nickname", &self.nickname())
            .field("role", &self.workitem.participant_name)
            .field("claimant", &self.claimant())
            .finish()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.workitem.id == other.workitem.id
    }
}

impl Eq for Task {}

fn hook_error(hook: &'static str) -> impl FnOnce(anyhow::Error) -> Error {
    move |source| Error::Hook { hook, source }
}

impl Task {
    /// Wraps a work item, resolving its behavior by nickname.
    pub(crate) fn new(coordinator: Coordinator, workitem: WorkItem) -> Self {
        let behavior = coordinator.behavior_for(workitem.nickname());
        Self {
            coordinator,
            workitem,
            behavior,
        }
    }

    /// The work item id.
    pub fn id(&self) -> &str {
        &self.workitem.id
    }

    /// The task type name, from `params.task`.
    pub fn nickname(&self) -> Option<&str> {
        self.workitem.nickname()
    }

    /// The participant currently holding the item.
    pub fn role(&self) -> &str {
        &self.workitem.participant_name
    }

    /// The owning process id.
    pub fn process_id(&self) -> &str {
        &self.workitem.wfid
    }

    /// The underlying work item.
    pub fn workitem(&self) -> &WorkItem {
        &self.workitem
    }

    /// The domain payload.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.workitem.fields
    }

    /// Mutable access to the payload. Changes persist on the next write.
    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.workitem.fields
    }

    /// Reads one payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.workitem.fields.get(key)
    }

    /// Sets one payload field, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.workitem.fields.insert(key.into(), value)
    }

    /// Handler params, including the claim.
    pub fn params(&self) -> &Map<String, Value> {
        &self.workitem.params
    }

    /// The claimant token, if claimed.
    pub fn claimant(&self) -> Option<&str> {
        self.workitem.claimant().filter(|c| !c.is_empty())
    }

    /// When the current claim was made.
    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claimant().and(self.workitem.claimed_at())
    }

    /// Whether a claimant is set.
    pub fn is_claimed(&self) -> bool {
        self.claimant().is_some()
    }

    /// The owning process.
    pub fn process(&self) -> Process {
        self.coordinator.process(self.workitem.wfid.clone())
    }

    /// Claims the task for `token` and persists the claim.
    ///
    /// Re-claiming with the current token succeeds and refreshes
    /// `claimed_at`. This check runs against the in-memory copy; see the
    /// module docs for the last-write-wins race.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyClaimToken`] for an empty token, [`Error::AlreadyClaimed`]
    /// if a different token holds the claim.
    pub async fn claim(&mut self, token: &str) -> Result<()> {
        self.check_token(token)?;
        if let Some(current) = self.claimant() {
            if current != token {
                return Err(Error::AlreadyClaimed {
                    task_id: self.workitem.id.clone(),
                    claimant: current.to_string(),
                });
            }
        }
        self.workitem.set_claim(Some(token));
        self.persist().await?;
        self.log(AuditAction::Claim, Metadata::new()).await;
        Ok(())
    }

    /// Claims the task against the stored item rather than this copy.
    ///
    /// Re-reads the item with its version, checks the stored claimant, and
    /// writes the claim only if the item is still at that version. On
    /// success this task is refreshed from the stored item, so unsaved local
    /// changes are dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyClaimToken`] for an empty token.
    /// - [`Error::AlreadyClaimed`] if the stored item is claimed by another token.
    /// - [`Error::StaleClaim`] if the item changed between read and write.
    /// - [`Error::MissingWorkitem`] if the item is gone.
    pub async fn claim_exclusive(&mut self, token: &str) -> Result<()> {
        self.check_token(token)?;
        let storage = self.coordinator.storage();
        let (document, version) = storage
            .get_versioned(DocKind::Workitems, &self.workitem.id)
            .await?
            .ok_or_else(|| Error::missing(self.workitem.id.clone()))?;
        let mut stored = WorkItem::from_document(&document)?;
        if let Some(current) = stored.claimant().filter(|c| !c.is_empty() && *c != token) {
            return Err(Error::AlreadyClaimed {
                task_id: stored.id.clone(),
                claimant: current.to_string(),
            });
        }

        stored.set_claim(Some(token));
        match storage
            .put_if_version(DocKind::Workitems, &stored.to_document()?, version)
            .await
        {
            Ok(_) => {},
            Err(StorageError::VersionConflict {
                expected, actual, ..
            }) => {
                return Err(Error::StaleClaim {
                    task_id: stored.id,
                    expected,
                    actual,
                });
            },
            Err(StorageError::NotFound { .. }) => return Err(Error::missing(stored.id)),
            Err(e) => return Err(e.into()),
        }
        self.workitem = stored;
        self.log(AuditAction::Claim, Metadata::new()).await;
        Ok(())
    }

    /// Clears the claim and persists. A no-op claim-wise on an unclaimed task.
    pub async fn release(&mut self) -> Result<()> {
        let actor = self.claimant().map(str::to_string);
        self.workitem.set_claim(None);
        self.persist().await?;
        let entry = self.entry(actor, AuditAction::Release, Metadata::new());
        self.coordinator.record(entry).await;
        Ok(())
    }

    /// Persists the current fields and params without advancing the process.
    pub async fn update(&mut self, metadata: Metadata) -> Result<()> {
        let behavior = self.behavior.clone();
        behavior
            .before_update(self, &metadata)
            .await
            .map_err(hook_error("before_update"))?;
        self.persist().await?;
        self.log(AuditAction::Update, metadata.clone()).await;
        behavior
            .after_update(self, &metadata)
            .await
            .map_err(hook_error("after_update"))?;
        Ok(())
    }

    /// Hands the item back to the engine so the process advances.
    ///
    /// Not idempotent: once the engine has taken the item, completing the
    /// same task again fails with [`Error::MissingWorkitem`].
    ///
    /// # Errors
    ///
    /// [`Error::NotCompletable`] when the task has no nickname or its
    /// behavior reports a completion blocker; nothing is written then.
    pub async fn complete(&mut self, metadata: Metadata) -> Result<()> {
        if let Some(reason) = self.completion_blocker() {
            return Err(Error::NotCompletable {
                task_id: self.workitem.id.clone(),
                reason,
            });
        }

        let behavior = self.behavior.clone();
        behavior
            .before_update(self, &metadata)
            .await
            .map_err(hook_error("before_update"))?;
        behavior
            .before_complete(self, &metadata)
            .await
            .map_err(hook_error("before_complete"))?;

        self.coordinator
            .engine()
            .proceed(&self.workitem)
            .await
            .map_err(|e| match e {
                EngineError::WorkitemGone(id) => Error::missing(id),
                other => Error::Engine(other),
            })?;
        tracing::debug!(task_id = %self.workitem.id, wfid = %self.workitem.wfid, "task completed");
        self.log(AuditAction::Complete, metadata.clone()).await;

        behavior
            .after_complete(self, &metadata)
            .await
            .map_err(hook_error("after_complete"))?;
        behavior
            .after_update(self, &metadata)
            .await
            .map_err(hook_error("after_update"))?;
        Ok(())
    }

    /// Why the task cannot be completed, if it cannot.
    pub fn completion_blocker(&self) -> Option<String> {
        if self.nickname().is_none() {
            return Some("no task nickname".to_string());
        }
        self.behavior.completion_blocker(self)
    }

    /// Whether both `entity_type` and `entity_id` fields are present.
    pub fn has_entity_fields(&self) -> bool {
        self.entity_fields().is_some()
    }

    /// Whether [`entity`](Self::entity) would succeed.
    pub async fn has_entity(&self) -> bool {
        self.entity().await.is_ok()
    }

    /// Resolves the domain entity named by the `entity_type`/`entity_id` fields.
    ///
    /// # Errors
    ///
    /// [`Error::EntityNotFound`] when either field is missing, no finder is
    /// registered for the type, or the lookup finds nothing.
    pub async fn entity(&self) -> Result<Arc<dyn Entity>> {
        let not_found = || Error::EntityNotFound {
            task_id: self.workitem.id.clone(),
            entity_type: self
                .get(FIELD_ENTITY_TYPE)
                .and_then(Value::as_str)
                .map(str::to_string),
            entity_id: self.get(FIELD_ENTITY_ID).and_then(identifier_of),
        };

        let (entity_type, entity_id) = self.entity_fields().ok_or_else(not_found)?;
        let finder = self
            .coordinator
            .entities()
            .finder(entity_type)
            .ok_or_else(not_found)?;
        match finder.first_by_identifier(&entity_id).await {
            Ok(Some(entity)) => Ok(entity),
            Ok(None) => Err(not_found()),
            Err(e) => {
                tracing::warn!(
                    task_id = %self.workitem.id,
                    entity_type = %entity_type,
                    error = %e,
                    "entity lookup failed"
                );
                Err(not_found())
            },
        }
    }

    /// Announces a fresh delivery: audits `dispatch`, then runs the
    /// `after_dispatch` hook. Called once per delivery by the storage
    /// participant.
    pub async fn on_dispatch(&mut self) -> Result<()> {
        self.log(AuditAction::Dispatch, Metadata::new()).await;
        let behavior = self.behavior.clone();
        behavior
            .after_dispatch(self)
            .await
            .map_err(hook_error("after_dispatch"))
    }

    /// Re-reads the item from the store, dropping unsaved changes.
    pub async fn reload(&mut self) -> Result<()> {
        *self = self.coordinator.task(&self.workitem.id).await?;
        Ok(())
    }

    fn check_token(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(Error::EmptyClaimToken {
                task_id: self.workitem.id.clone(),
            });
        }
        Ok(())
    }

    fn entity_fields(&self) -> Option<(&str, String)> {
        let entity_type = self
            .get(FIELD_ENTITY_TYPE)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())?;
        let entity_id = self.get(FIELD_ENTITY_ID).and_then(identifier_of)?;
        Some((entity_type, entity_id))
    }

    async fn persist(&self) -> Result<()> {
        self.coordinator
            .storage()
            .put(DocKind::Workitems, &self.workitem.to_document()?)
            .await?;
        Ok(())
    }

    fn entry(&self, actor: Option<String>, action: AuditAction, mut metadata: Metadata) -> AuditEntry {
        metadata.insert(
            META_CURRENT_FIELDS.to_string(),
            Value::Object(self.workitem.fields.clone()),
        );
        AuditEntry {
            actor,
            action,
            target_type: "Task".to_string(),
            target_id: self.workitem.id.clone(),
            metadata,
            recorded_at: Utc::now(),
        }
    }

    async fn log(&self, action: AuditAction, metadata: Metadata) {
        let entry = self.entry(self.claimant().map(str::to_string), action, metadata);
        self.coordinator.record(entry).await;
    }
}
