//! Read-only views over engine subscription records.
//!
//! A tracker record looks like:
//!
//! ```json
//! {
//!   "wfid": "20240101-abc",
//!   "action": "left_tag",
//!   "conditions": { "tag": ["a_friend"] },
//!   "msg": { "action": "reply", "fei": { "wfid": "20240101-abc", "expid": "0_0_1" } }
//! }
//! ```
//!
//! `wfid` is present only for process-scoped subscriptions. `msg.fei`
//! always names the expression that subscribed.

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::process::Process;

/// The expression a subscription replies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscriber {
    /// Process owning the waiting expression.
    pub wfid: String,
    /// Id of the waiting expression.
    pub expid: String,
}

/// One live subscription.
#[derive(Clone)]
pub struct Tracker {
    coordinator: Coordinator,
    id: String,
    record: Value,
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.id)
            .field("record", &self.record)
            .finish()
    }
}

impl Tracker {
    pub(crate) fn new(coordinator: Coordinator, id: String, record: Value) -> Self {
        Self {
            coordinator,
            id,
            record,
        }
    }

    /// Tracker id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The raw record.
    pub fn original_record(&self) -> &Value {
        &self.record
    }

    /// Scoping process id; `None` for global subscriptions.
    pub fn wfid(&self) -> Option<&str> {
        self.record
            .get("wfid")
            .and_then(Value::as_str)
            .filter(|w| !w.is_empty())
    }

    /// Whether the subscription listens beyond one process.
    pub fn is_global(&self) -> bool {
        self.wfid().is_none()
    }

    /// Condition kind to matchers, e.g. `{"tag": ["a_friend"]}`.
    pub fn conditions(&self) -> IndexMap<String, Vec<String>> {
        let Some(conditions) = self.record.get("conditions").and_then(Value::as_object) else {
            return IndexMap::new();
        };
        conditions
            .iter()
            .map(|(kind, matchers)| {
                let matchers = match matchers {
                    Value::Array(values) => values.iter().filter_map(matcher).collect(),
                    other => matcher(other).into_iter().collect(),
                };
                (kind.clone(), matchers)
            })
            .collect()
    }

    /// Tags awaited; empty when there is no tag condition.
    pub fn tags(&self) -> Vec<String> {
        self.conditions().shift_remove("tag").unwrap_or_default()
    }

    /// Action awaited, e.g. `"left_tag"`.
    pub fn action(&self) -> Option<&str> {
        self.record.get("action").and_then(Value::as_str)
    }

    /// The subscribing expression.
    pub fn subscriber(&self) -> Option<Subscriber> {
        let fei = self.record.get("msg")?.get("fei")?;
        Some(Subscriber {
            wfid: fei.get("wfid")?.as_str()?.to_string(),
            expid: fei.get("expid")?.as_str()?.to_string(),
        })
    }

    /// The scoping process; `None` for global subscriptions.
    pub fn process(&self) -> Option<Process> {
        self.wfid().map(|wfid| self.coordinator.process(wfid))
    }

    /// Tree of the waiting expression, `None` once it is gone.
    pub async fn waiting_expression(&self) -> Result<Option<Value>> {
        let Some(subscriber) = self.subscriber() else {
            return Ok(None);
        };
        Ok(self
            .coordinator
            .process(subscriber.wfid)
            .expression(&subscriber.expid)
            .await?
            .map(|e| e.tree))
    }

    /// The waiting expression's `where` attribute.
    pub async fn where_clause(&self) -> Result<Option<String>> {
        Ok(self
            .waiting_expression()
            .await?
            .as_ref()
            .and_then(|tree| tree.get(1)?.get("where")?.as_str().map(str::to_string)))
    }
}

fn matcher(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
