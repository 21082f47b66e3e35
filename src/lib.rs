//! Task coordination and process lifecycle control over a workflow engine.
//!
//! `hivework` sits on top of an eventually consistent store of in-flight
//! work items. Processes advance by passing work items between named
//! participants; items that carry a task nickname are human or external
//! tasks that must be found, claimed, updated and completed without
//! double-processing.
//!
//! # Overview
//!
//! - Tasks: claim, release, update and complete transitions on one work item
//!   ([`Task`]).
//! - Queries: composable predicates with a bounded polling wait
//!   ([`TaskFinder::next_available`]).
//! - Termination: cancel and kill of one or many processes, confirmed by
//!   polling the engine ([`ProcessController`]).
//! - Trackers: read-only views over the engine's subscription records
//!   ([`Tracker`]).
//!
//! # Module Organization
//!
//! - [`coordinator`] - The shared handle tying everything together
//! - [`task`] - Task view, behaviors and the finder
//! - [`lifecycle`] - Termination with confirmation
//! - [`process`] / [`tracker`] - Read views over engine state
//! - [`store`] - Document store boundary and in-memory backend
//! - [`engine`] - Engine boundary and the in-memory reference engine
//! - [`participant`] - Delivery of new work items into this layer
//! - [`audit`] - Audit trail sinks
//! - [`config`] - Configuration from TOML and environment
//! - [`error`] - Error types

pub mod audit;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod engine;
pub mod entity;
pub mod error;
pub mod lifecycle;
#[cfg(feature = "logging")]
pub mod logging;
pub mod participant;
pub mod process;
pub mod store;
pub mod task;
pub mod tracker;
pub mod workitem;

// Re-exports for ergonomic access
pub use audit::{AuditAction, AuditEntry, AuditSink, MemoryAuditSink, NullAuditSink, TracingAuditSink};
pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use engine::{Engine, EngineError, Expression, ProcessStatus};
pub use entity::{Entity, EntityFinder, EntityRef, EntityRegistry};
pub use error::{Error, ErrorKind, Result};
pub use lifecycle::{
    CancellationRequest, ProcessController, TerminationMethod, TerminationOptions,
    TerminationState,
};
pub use participant::{Participant, StorageParticipant, WorkHandler};
pub use process::{Process, TagScope};
pub use store::{DocKind, Document, GenericStorage, Storage, StorageError};
pub use task::behavior::{Metadata, NoopBehavior, TaskBehavior, TaskRegistry};
pub use task::finder::TaskFinder;
pub use task::Task;
pub use tracker::{Subscriber, Tracker};
pub use workitem::WorkItem;
