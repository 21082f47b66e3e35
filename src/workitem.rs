//! The work item: the unit of in-flight state passed between process steps.
//!
//! A [`WorkItem`] is owned by the engine and the store. Tasks hold a copy
//! for the duration of one operation and write the whole item back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{PARAM_CLAIMANT, PARAM_CLAIMED_AT, PARAM_TASK};
use crate::error::{Error, Result};
use crate::store::Document;

/// A work item as persisted in the store.
///
/// `fields` is the domain payload; `params` is handler configuration and
/// holds the task metadata (`task`, `claimant`, `claimed_at`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier, the store key.
    pub id: String,
    /// Owning process instance.
    pub wfid: String,
    /// Participant (handler) currently holding the item.
    pub participant_name: String,
    /// Name of the process definition that produced the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_name: Option<String>,
    /// Domain payload.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Handler configuration, including task metadata.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl WorkItem {
    /// Creates a work item with a fresh v4 id.
    pub fn new(wfid: impl Into<String>, participant_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            wfid: wfid.into(),
            participant_name: participant_name.into(),
            definition_name: None,
            fields: Map::new(),
            params: Map::new(),
        }
    }

    /// Sets the task nickname param.
    pub fn with_task(mut self, nickname: impl Into<String>) -> Self {
        self.params
            .insert(PARAM_TASK.to_string(), Value::String(nickname.into()));
        self
    }

    /// Sets a payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// The task nickname, when the item is a task (non-empty `params.task`).
    pub fn nickname(&self) -> Option<&str> {
        self.params
            .get(PARAM_TASK)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The claimant token, if claimed.
    pub fn claimant(&self) -> Option<&str> {
        self.params.get(PARAM_CLAIMANT).and_then(Value::as_str)
    }

    /// The claim timestamp, if claimed.
    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.params
            .get(PARAM_CLAIMED_AT)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Sets or clears the claim. Both claim params change together.
    pub(crate) fn set_claim(&mut self, token: Option<&str>) {
        match token {
            Some(token) => {
                self.params
                    .insert(PARAM_CLAIMANT.to_string(), Value::String(token.to_string()));
                self.params.insert(
                    PARAM_CLAIMED_AT.to_string(),
                    Value::String(
                        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    ),
                );
            },
            None => {
                self.params.remove(PARAM_CLAIMANT);
                self.params.remove(PARAM_CLAIMED_AT);
            },
        }
    }

    /// Wraps the item in its storage envelope.
    pub fn to_document(&self) -> Result<Document> {
        let body = serde_json::to_value(self)
            .map_err(|e| Error::InvalidWorkitem(format!("{}: {e}", self.id)))?;
        Ok(Document::new(self.id.clone(), Some(self.wfid.clone()), body))
    }

    /// Decodes an item from its storage envelope.
    pub fn from_document(document: &Document) -> Result<Self> {
        serde_json::from_value(document.body.clone())
            .map_err(|e| Error::InvalidWorkitem(format!("{}: {e}", document.id)))
    }
}

/// Renders a JSON scalar as an identifier string (`"42"` and `42` compare equal).
pub(crate) fn identifier_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nickname_requires_non_empty_task_param() {
        let item = WorkItem::new("wf", "bob");
        assert_eq!(item.nickname(), None);
        assert_eq!(item.clone().with_task("").nickname(), None);
        assert_eq!(item.with_task("chew_cud").nickname(), Some("chew_cud"));
    }

    #[test]
    fn claim_fields_move_together() {
        let mut item = WorkItem::new("wf", "bob").with_task("t");
        item.set_claim(Some("alice"));
        assert_eq!(item.claimant(), Some("alice"));
        assert!(item.claimed_at().is_some());

        item.set_claim(None);
        assert_eq!(item.claimant(), None);
        assert_eq!(item.claimed_at(), None);
        assert!(!item.params.contains_key(PARAM_CLAIMED_AT));
    }

    #[test]
    fn document_envelope_carries_wfid() {
        let item = WorkItem::new("wf-7", "bob").with_field("color", json!("blue"));
        let doc = item.to_document().unwrap();
        assert_eq!(doc.wfid.as_deref(), Some("wf-7"));
        assert_eq!(WorkItem::from_document(&doc).unwrap(), item);
    }

    #[test]
    fn identifier_of_accepts_strings_and_numbers() {
        assert_eq!(identifier_of(&json!("abc")), Some("abc".to_string()));
        assert_eq!(identifier_of(&json!(42)), Some("42".to_string()));
        assert_eq!(identifier_of(&json!(null)), None);
    }
}
