//! Run outcomes: per-stage results, termination causes, and the final
//! workflow report.
//!
//! Per-stage errors are captured here rather than raised, so a run always
//! terminates with a structured report sufficient to reproduce the failure
//! from the same initial arguments.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::gate::PredicateOutcome;
use crate::identifiers::{ContextKey, GateName, RunId, StageName, WorkflowName};
use crate::types::Timestamp;
use crate::worker::WorkerOutput;

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

/// Terminal status of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The worker returned an output payload.
    Success,
    /// The worker failed after exhausting the retry budget, returned a
    /// non-retryable error, or violated its output contract.
    Failure,
    /// The worker did not return within the stage's maximum duration.
    /// Never retried.
    Timeout,
    /// Run-level cancellation was observed before or during the invocation.
    Cancelled,
}

/// The outcome of one stage invocation. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage that was executed.
    pub stage: StageName,
    /// How the invocation ended.
    pub status: StageStatus,
    /// Attempts consumed, including the final one. Zero when the worker was
    /// never invoked (missing inputs, cancellation before the first attempt).
    pub attempts: u32,
    /// Output payload; present only on success.
    pub output: Option<WorkerOutput>,
    /// Error detail; present on failure and timeout.
    pub error: Option<String>,
    /// Wall-clock time spent in the stage, retries included.
    pub duration: Duration,
    /// When the stage started.
    pub started_at: Timestamp,
}

impl StageResult {
    /// Returns `true` if the stage succeeded.
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Run termination
// ---------------------------------------------------------------------------

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// All stages ran and all gates passed.
    Completed,
    /// The run terminated early; [`Termination`] names the cause.
    Aborted,
}

/// Why an aborted run terminated.
///
/// Always names the failing stage or gate, so the caller can reproduce the
/// failure from the report alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A stage failed or timed out after its retry budget.
    StageFailed {
        /// The failing stage; its [`StageResult`] is the last entry in the
        /// report's result list.
        stage: StageName,
    },
    /// A gate failed and its policy was abort.
    GateFailed {
        /// The failing gate.
        gate: GateName,
        /// Every failing predicate, not just the first.
        failures: Vec<PredicateOutcome>,
    },
    /// The initial arguments did not cover the declared parameters.
    MissingArguments {
        /// The declared parameter keys absent from the initial arguments.
        keys: Vec<ContextKey>,
    },
    /// The run-level cancellation token fired.
    Cancelled {
        /// The stage in flight (or about to start) when cancellation was
        /// observed, if any.
        stage: Option<StageName>,
    },
}

// ---------------------------------------------------------------------------
// Workflow report
// ---------------------------------------------------------------------------

/// The single output of a workflow run: terminal status, the full stage
/// result sequence, and the final context snapshot for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    /// The run this report describes.
    pub run: RunId,
    /// The workflow that was executed.
    pub workflow: WorkflowName,
    /// Terminal status.
    pub status: RunStatus,
    /// Cause of termination; `None` exactly when the run completed.
    pub termination: Option<Termination>,
    /// Every stage result, in execution order.
    pub results: Vec<StageResult>,
    /// The context as of the last successful merge.
    pub context: ExecutionContext,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run reached its terminal state.
    pub finished_at: Timestamp,
}

impl WorkflowReport {
    /// Returns `true` if the run completed all stages with all gates passing.
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// The sequence of stage statuses, in execution order.
    pub fn status_sequence(&self) -> Vec<StageStatus> {
        self.results.iter().map(|result| result.status).collect()
    }
}
