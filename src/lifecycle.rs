//! Process termination with confirmation.
//!
//! Engine directives are fire-and-forget, so [`ProcessController`] confirms
//! every termination by polling the engine until the targeted processes are
//! no longer reported, or the deadline passes. Each targeted id moves
//! through [`TerminationState`]: `Requested`, `AwaitingConfirmation`, then
//! `Confirmed` or `TimedOut`.
//!
//! Bulk operations re-read the live set on every poll and re-send the
//! directive to every id still in it, including processes launched after
//! the operation started. They converge as long as new processes are not
//! launched faster than they are drained.
//!
//! Every wait re-checks elapsed wall-clock time, and dropping the future
//! abandons it; each poll is a fresh read, so nothing is left half-done.

use std::fmt;
use std::time::{Duration, Instant};

use crate::coordinator::Coordinator;
use crate::error::{Error, Result};

/// Which directive to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationMethod {
    /// Runs on-cancel branches before terminating.
    Cancel,
    /// Terminates without running on-cancel branches.
    Kill,
}

impl TerminationMethod {
    fn timeout_error(self, timeout: Duration, remaining: usize) -> Error {
        match self {
            Self::Cancel => Error::CancelTimeout { timeout, remaining },
            Self::Kill => Error::KillTimeout { timeout, remaining },
        }
    }
}

impl fmt::Display for TerminationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel => f.write_str("cancel"),
            Self::Kill => f.write_str("kill"),
        }
    }
}

/// Progress of one termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    /// The directive has not been confirmed yet.
    Requested,
    /// The directive was sent; polling for absence.
    AwaitingConfirmation,
    /// The engine no longer reports the process.
    Confirmed,
    /// The deadline passed first.
    TimedOut,
}

/// Options for kill operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminationOptions {
    /// Deadline; the configured timeout when `None`.
    pub timeout: Option<Duration>,
    /// Bypass the engine and delete persisted state directly.
    pub force: bool,
}

impl TerminationOptions {
    /// Sets the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enables forced removal.
    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// One termination invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationRequest {
    /// Targeted ids; `None` targets every live process, re-read on each poll.
    pub process_ids: Option<Vec<String>>,
    /// Directive to send.
    pub method: TerminationMethod,
    /// Deadline for confirmation.
    pub timeout: Duration,
    /// Delete persisted state instead of messaging the engine.
    pub force: bool,
}

/// Drives cancel and kill of one or many processes.
#[derive(Debug, Clone)]
pub struct ProcessController {
    coordinator: Coordinator,
}

impl ProcessController {
    pub(crate) fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.coordinator.config().timeout())
    }

    /// Cancels one process and waits until the engine no longer reports it.
    ///
    /// A process that is already gone counts as cancelled.
    ///
    /// # Errors
    ///
    /// [`Error::CancelTimeout`] if it is still reported after `timeout`.
    pub async fn cancel_process(&self, wfid: &str, timeout: Option<Duration>) -> Result<()> {
        self.execute(CancellationRequest {
            process_ids: Some(vec![wfid.to_string()]),
            method: TerminationMethod::Cancel,
            timeout: self.timeout_or_default(timeout),
            force: false,
        })
        .await
    }

    /// Kills one process and waits until the engine no longer reports it.
    ///
    /// With `force`, the process's persisted state is removed from the
    /// store directly and the call returns without polling.
    ///
    /// # Errors
    ///
    /// [`Error::KillTimeout`] if it is still reported after the deadline.
    pub async fn kill_process(&self, wfid: &str, options: TerminationOptions) -> Result<()> {
        self.execute(CancellationRequest {
            process_ids: Some(vec![wfid.to_string()]),
            method: TerminationMethod::Kill,
            timeout: self.timeout_or_default(options.timeout),
            force: options.force,
        })
        .await
    }

    /// Cancels every live process, including ones launched meanwhile.
    ///
    /// # Errors
    ///
    /// [`Error::CancelTimeout`] if processes remain after `timeout`.
    pub async fn cancel_all_processes(&self, timeout: Option<Duration>) -> Result<()> {
        self.execute(CancellationRequest {
            process_ids: None,
            method: TerminationMethod::Cancel,
            timeout: self.timeout_or_default(timeout),
            force: false,
        })
        .await
    }

    /// Kills every live process, including ones launched meanwhile.
    ///
    /// With `force`, the whole store is cleared on each poll instead of
    /// messaging the engine, until nothing is reported live.
    ///
    /// # Errors
    ///
    /// [`Error::KillTimeout`] if processes remain after the deadline.
    pub async fn kill_all_processes(&self, options: TerminationOptions) -> Result<()> {
        self.execute(CancellationRequest {
            process_ids: None,
            method: TerminationMethod::Kill,
            timeout: self.timeout_or_default(options.timeout),
            force: options.force,
        })
        .await
    }

    /// Sends `method` to each id, in order, without waiting.
    pub async fn send_cancellation_message(
        &self,
        method: TerminationMethod,
        wfids: &[String],
    ) -> Result<()> {
        let engine = self.coordinator.engine();
        for wfid in wfids {
            match method {
                TerminationMethod::Cancel => engine.cancel(wfid).await?,
                TerminationMethod::Kill => engine.kill(wfid).await?,
            }
        }
        Ok(())
    }

    /// Runs a termination request to confirmation or timeout.
    pub async fn execute(&self, request: CancellationRequest) -> Result<()> {
        match &request.process_ids {
            Some(wfids) if request.force => self.remove(wfids).await,
            Some(wfids) => self.terminate_targeted(&request, wfids).await,
            None => self.terminate_live(&request).await,
        }
    }

    async fn remove(&self, wfids: &[String]) -> Result<()> {
        let storage = self.coordinator.storage();
        for wfid in wfids {
            let removed = storage.remove_process(wfid).await?;
            tracing::info!(wfid = %wfid, removed, "forcibly removed process state");
        }
        Ok(())
    }

    async fn still_live(&self, wfids: &[String]) -> Result<Vec<String>> {
        let engine = self.coordinator.engine();
        let mut live = Vec::new();
        for wfid in wfids {
            if engine.process(wfid).await?.is_some() {
                live.push(wfid.clone());
            }
        }
        Ok(live)
    }

    async fn terminate_targeted(&self, request: &CancellationRequest, wfids: &[String]) -> Result<()> {
        let started = Instant::now();
        let interval = self.coordinator.config().termination_poll_interval();
        tracing::debug!(method = %request.method, targets = wfids.len(), state = ?TerminationState::Requested, "terminating processes");
        self.send_cancellation_message(request.method, wfids).await?;

        loop {
            let live = self.still_live(wfids).await?;
            let elapsed = started.elapsed();
            if live.is_empty() {
                tracing::debug!(
                    method = %request.method,
                    elapsed_ms = elapsed.as_millis() as u64,
                    state = ?TerminationState::Confirmed,
                    "termination confirmed"
                );
                return Ok(());
            }
            if elapsed >= request.timeout {
                tracing::debug!(method = %request.method, remaining = live.len(), state = ?TerminationState::TimedOut, "termination timed out");
                return Err(request.method.timeout_error(request.timeout, live.len()));
            }
            tracing::debug!(method = %request.method, remaining = live.len(), state = ?TerminationState::AwaitingConfirmation, "awaiting termination");
            tokio::time::sleep(interval.min(request.timeout - elapsed)).await;
        }
    }

    async fn terminate_live(&self, request: &CancellationRequest) -> Result<()> {
        let started = Instant::now();
        let interval = self.coordinator.config().termination_poll_interval();
        let engine = self.coordinator.engine();

        // Every snapshot, the first included, gets its directive before the
        // deadline is consulted.
        let mut live = engine.process_ids().await?;
        loop {
            if live.is_empty() {
                tracing::debug!(
                    method = %request.method,
                    force = request.force,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    state = ?TerminationState::Confirmed,
                    "all processes terminated"
                );
                return Ok(());
            }

            if request.force {
                let removed = self.coordinator.storage().clear().await?;
                tracing::info!(removed, "cleared store");
            } else {
                tracing::debug!(method = %request.method, live = live.len(), state = ?TerminationState::AwaitingConfirmation, "sending directives");
                self.send_cancellation_message(request.method, &live).await?;
            }
            tokio::time::sleep(interval.min(request.timeout.saturating_sub(started.elapsed()))).await;

            live = engine.process_ids().await?;
            if !live.is_empty() && started.elapsed() >= request.timeout {
                tracing::debug!(method = %request.method, remaining = live.len(), state = ?TerminationState::TimedOut, "bulk termination timed out");
                return Err(request.method.timeout_error(request.timeout, live.len()));
            }
        }
    }
}
