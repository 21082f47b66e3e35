//! Read-mostly view over one process instance.
//!
//! A [`Process`] holds only the process id. Every accessor re-reads the
//! engine, so a view never goes stale and never keeps engine state alive.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::coordinator::Coordinator;
use crate::engine::{Expression, ProcessStatus};
use crate::error::Result;
use crate::lifecycle::TerminationOptions;
use crate::task::finder::TaskFinder;
use crate::tracker::Tracker;

/// Where a subscribed tag is listened for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagScope {
    /// Events from any process.
    Global,
    /// Events raised inside the named process.
    Process(String),
}

/// A process instance, identified by its wfid.
#[derive(Clone)]
pub struct Process {
    coordinator: Coordinator,
    wfid: String,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process").field("wfid", &self.wfid).finish()
    }
}

impl PartialEq for Process {
    fn eq(&self, other: &Self) -> bool {
        self.wfid == other.wfid
    }
}

impl Eq for Process {}

impl Hash for Process {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.wfid.hash(state);
    }
}

impl Process {
    pub(crate) fn new(coordinator: Coordinator, wfid: String) -> Self {
        Self { coordinator, wfid }
    }

    /// The process id.
    pub fn wfid(&self) -> &str {
        &self.wfid
    }

    /// The engine's snapshot, `None` once the process is gone.
    pub async fn status(&self) -> Result<Option<ProcessStatus>> {
        Ok(self.coordinator.engine().process(&self.wfid).await?)
    }

    /// Whether the engine still reports the process.
    pub async fn is_live(&self) -> Result<bool> {
        Ok(self.status().await?.is_some())
    }

    /// Live expressions; empty once the process is gone.
    pub async fn expressions(&self) -> Result<Vec<Expression>> {
        Ok(self
            .status()
            .await?
            .map(|status| status.expressions)
            .unwrap_or_default())
    }

    /// One live expression by id.
    pub async fn expression(&self, expid: &str) -> Result<Option<Expression>> {
        Ok(self
            .expressions()
            .await?
            .into_iter()
            .find(|e| e.expid == expid))
    }

    /// Finder restricted to this process's tasks.
    pub fn tasks(&self) -> TaskFinder {
        self.coordinator.tasks().for_process(self.wfid.clone())
    }

    /// Subscriptions made by expressions of this process.
    pub async fn trackers(&self) -> Result<Vec<Tracker>> {
        Ok(self
            .coordinator
            .trackers()
            .await?
            .into_iter()
            .filter(|t| t.subscriber().is_some_and(|s| s.wfid == self.wfid))
            .collect())
    }

    /// Tags this process waits on, grouped by scope.
    pub async fn all_subscribed_tags(&self) -> Result<BTreeMap<TagScope, Vec<String>>> {
        let mut tags: BTreeMap<TagScope, Vec<String>> = BTreeMap::new();
        for tracker in self.trackers().await? {
            let scope = match tracker.wfid() {
                Some(wfid) => TagScope::Process(wfid.to_string()),
                None => TagScope::Global,
            };
            tags.entry(scope).or_default().extend(tracker.tags());
        }
        Ok(tags)
    }

    /// Global events this process waits on.
    pub async fn subscribed_events(&self) -> Result<Vec<String>> {
        Ok(self
            .all_subscribed_tags()
            .await?
            .remove(&TagScope::Global)
            .unwrap_or_default())
    }

    /// Whether the process waits on the global event `event`.
    pub async fn is_waiting_for(&self, event: &str) -> Result<bool> {
        Ok(self.subscribed_events().await?.iter().any(|e| e == event))
    }

    /// Cancels the process and waits for confirmation.
    pub async fn cancel(&self, timeout: Option<Duration>) -> Result<()> {
        self.coordinator
            .processes()
            .cancel_process(&self.wfid, timeout)
            .await
    }

    /// Kills the process and waits for confirmation.
    pub async fn kill(&self, options: TerminationOptions) -> Result<()> {
        self.coordinator
            .processes()
            .kill_process(&self.wfid, options)
            .await
    }
}

impl AsRef<str> for Process {
    fn as_ref(&self) -> &str {
        &self.wfid
    }
}
