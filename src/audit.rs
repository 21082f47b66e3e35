//! Audit trail for task transitions.
//!
//! Every successful task transition (dispatch, claim, release, update,
//! complete) produces one [`AuditEntry`], handed to the configured
//! [`AuditSink`].
//!
//! - [`TracingAuditSink`] - structured `tracing` events (the default)
//! - [`MemoryAuditSink`] - in-process buffer, handy for tests and embedding
//! - [`NullAuditSink`] - drops everything
//!
//! # Error Handling
//!
//! Sinks do not return errors. An audit failure never fails a task
//! transition; implementations log it and move on.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::AUDIT_TARGET;

/// The transition an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A work item was delivered to this layer.
    Dispatch,
    /// A task was claimed.
    Claim,
    /// A claim was released.
    Release,
    /// Task state was persisted without advancing the process.
    Update,
    /// The task was completed and the process advanced.
    Complete,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dispatch => "dispatch",
            Self::Claim => "claim",
            Self::Release => "release",
            Self::Update => "update",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Claimant token at the time of the transition, if any.
    pub actor: Option<String>,
    /// What happened.
    pub action: AuditAction,
    /// Always `"Task"` for task transitions.
    pub target_type: String,
    /// The task (work item) id.
    pub target_id: String,
    /// Caller metadata plus a `current_fields` snapshot.
    pub metadata: Map<String, Value>,
    /// When the entry was produced.
    pub recorded_at: DateTime<Utc>,
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Record one entry.
    async fn record(&self, entry: &AuditEntry);

    /// Sink name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Emits each entry as a `tracing` info event on the `hivework.audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditEntry) {
        let metadata = serde_json::to_string(&entry.metadata).unwrap_or_default();
        tracing::info!(
            target: AUDIT_TARGET,
            actor = ?entry.actor,
            action = %entry.action,
            target_type = %entry.target_type,
            target_id = %entry.target_id,
            metadata = %metadata,
            "task transition"
        );
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Buffers entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Actions recorded so far, in order.
    pub fn actions(&self) -> Vec<AuditAction> {
        self.entries.lock().iter().map(|e| e.action).collect()
    }

    /// Drops all buffered entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: &AuditEntry) {
        self.entries.lock().push(entry.clone());
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Discards every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _entry: &AuditEntry) {}

    fn name(&self) -> &'static str {
        "null"
    }
}
