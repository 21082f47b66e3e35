//! Well-known work item keys and timing defaults.

/// Param key holding the task nickname (task type).
pub const PARAM_TASK: &str = "task";

/// Param key holding the claimant token.
pub const PARAM_CLAIMANT: &str = "claimant";

/// Param key holding the RFC 3339 claim timestamp.
pub const PARAM_CLAIMED_AT: &str = "claimed_at";

/// Field key naming the domain entity type a task is about.
pub const FIELD_ENTITY_TYPE: &str = "entity_type";

/// Field key holding the domain entity identifier.
pub const FIELD_ENTITY_ID: &str = "entity_id";

/// Audit metadata key carrying a snapshot of the work item fields.
pub const META_CURRENT_FIELDS: &str = "current_fields";

/// Tracing target for audit entries.
pub const AUDIT_TARGET: &str = "hivework.audit";

/// Default deadline for blocking operations, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default poll cadence for waits and termination loops, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
