//! The workflow engine: drives a run from its initial context to a terminal
//! report.
//!
//! Stages execute strictly sequentially, since each depends on the
//! accumulated context of all prior stages, and the engine is the only
//! writer of the run's context. Stage-level errors are retried by the stage
//! executor per
//! the stage's budget; gate failures are never silently retried and either
//! abort the run or route to a declared fallback stage.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use workflow::{
    ContextKey, EscalationPolicy, ExecutionContext, RunId, RunStatus, StageResult, StageStatus,
    Termination, Timestamp, WorkerOutput, WorkflowDefinition, WorkflowError, WorkflowReport,
};

use crate::executor::StageExecutor;
use crate::registry::WorkerRegistry;

/// Drives workflow runs against a shared worker registry.
///
/// The engine holds no per-run state; independent runs may execute
/// concurrently, each owning its own context and result list.
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    registry: Arc<WorkerRegistry>,
    executor: StageExecutor,
}

impl WorkflowEngine {
    /// Creates an engine with the default stage executor.
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            executor: StageExecutor::new(),
        }
    }

    /// Creates an engine with a custom stage executor.
    pub fn with_executor(registry: Arc<WorkerRegistry>, executor: StageExecutor) -> Self {
        Self { registry, executor }
    }

    /// Runs a workflow to its terminal state.
    ///
    /// Equivalent to [`WorkflowEngine::run_workflow_with_cancel`] with a
    /// token that never fires.
    pub async fn run_workflow(
        &self,
        definition: &WorkflowDefinition,
        initial_arguments: BTreeMap<ContextKey, Value>,
    ) -> Result<WorkflowReport, WorkflowError> {
        self.run_workflow_with_cancel(definition, initial_arguments, CancellationToken::new())
            .await
    }

    /// Runs a workflow to its terminal state, honoring a run-level
    /// cancellation token.
    ///
    /// Returns `Err` only when a worker binding cannot be resolved; every
    /// in-run failure terminates with a structured [`WorkflowReport`]
    /// instead. The token is checked before each stage and cancels the
    /// in-flight worker call; the context stays at its last successful merge.
    pub async fn run_workflow_with_cancel(
        &self,
        definition: &WorkflowDefinition,
        initial_arguments: BTreeMap<ContextKey, Value>,
        cancel: CancellationToken,
    ) -> Result<WorkflowReport, WorkflowError> {
        for name in definition.worker_names() {
            if !self.registry.contains(name) {
                return Err(WorkflowError::UnknownWorker { name: name.clone() });
            }
        }

        let run = RunId::new_random();
        let started_at = Timestamp::now();
        tracing::info!(
            run = %run,
            workflow = %definition.name(),
            stages = definition.stages().len(),
            "workflow run started"
        );

        let context = ExecutionContext::from_initial(initial_arguments);
        let mut results: Vec<StageResult> = Vec::new();

        let missing: Vec<ContextKey> = definition
            .parameters()
            .iter()
            .filter(|key| !context.contains(key))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Ok(self.finish(
                run,
                definition,
                Some(Termination::MissingArguments { keys: missing }),
                results,
                context,
                started_at,
            ));
        }

        let mut context = context;
        let mut queue: VecDeque<_> = definition.stages().iter().cloned().collect();

        while let Some(spec) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Ok(self.finish(
                    run,
                    definition,
                    Some(Termination::Cancelled {
                        stage: Some(spec.name.clone()),
                    }),
                    results,
                    context,
                    started_at,
                ));
            }

            // Bindings were resolved above; a miss here is a registry bug.
            let Some(worker) = self.registry.get(&spec.worker) else {
                return Err(WorkflowError::UnknownWorker {
                    name: spec.worker.clone(),
                });
            };

            let mut result = self
                .executor
                .execute(run, &spec, worker.as_ref(), &context, &cancel)
                .await;

            if result.status == StageStatus::Success {
                let payload = result
                    .output
                    .clone()
                    .map(WorkerOutput::into_map)
                    .unwrap_or_default();
                if let Err(error) = context.merge_stage_output(&spec.name, &spec.produces, payload)
                {
                    tracing::error!(run = %run, stage = %spec.name, %error, "merge rejected");
                    result.status = StageStatus::Failure;
                    result.output = None;
                    result.error = Some(error.to_string());
                }
            }

            match result.status {
                StageStatus::Success => {
                    tracing::info!(run = %run, stage = %spec.name, "stage succeeded");
                    results.push(result);

                    for binding in definition.gates_after(&spec.name) {
                        let report = binding.gate.evaluate(&context);
                        if report.passed() {
                            tracing::debug!(run = %run, gate = %binding.gate.name, "gate passed");
                            continue;
                        }
                        match &binding.policy {
                            EscalationPolicy::Abort => {
                                tracing::warn!(
                                    run = %run,
                                    gate = %binding.gate.name,
                                    failures = report.failures().len(),
                                    "gate failed; aborting"
                                );
                                return Ok(self.finish(
                                    run,
                                    definition,
                                    Some(Termination::GateFailed {
                                        gate: binding.gate.name.clone(),
                                        failures: report.failures(),
                                    }),
                                    results,
                                    context,
                                    started_at,
                                ));
                            }
                            EscalationPolicy::Fallback { stage } => {
                                tracing::warn!(
                                    run = %run,
                                    gate = %binding.gate.name,
                                    fallback = %stage,
                                    "gate failed; routing to fallback stage"
                                );
                                if let Some(fallback) = definition.fallback_stage(stage) {
                                    queue.push_front(fallback.clone());
                                }
                                // The fallback runs next; later gates after
                                // this stage are superseded by the reroute.
                                break;
                            }
                        }
                    }
                }
                StageStatus::Failure | StageStatus::Timeout => {
                    let stage = result.stage.clone();
                    results.push(result);
                    return Ok(self.finish(
                        run,
                        definition,
                        Some(Termination::StageFailed { stage }),
                        results,
                        context,
                        started_at,
                    ));
                }
                StageStatus::Cancelled => {
                    let stage = result.stage.clone();
                    results.push(result);
                    return Ok(self.finish(
                        run,
                        definition,
                        Some(Termination::Cancelled { stage: Some(stage) }),
                        results,
                        context,
                        started_at,
                    ));
                }
            }
        }

        Ok(self.finish(run, definition, None, results, context, started_at))
    }

    fn finish(
        &self,
        run: RunId,
        definition: &WorkflowDefinition,
        termination: Option<Termination>,
        results: Vec<StageResult>,
        context: ExecutionContext,
        started_at: Timestamp,
    ) -> WorkflowReport {
        let status = if termination.is_none() {
            RunStatus::Completed
        } else {
            RunStatus::Aborted
        };
        match &termination {
            None => tracing::info!(run = %run, "workflow run completed"),
            Some(cause) => {
                tracing::warn!(run = %run, cause = ?cause, "workflow run aborted");
            }
        }
        WorkflowReport {
            run,
            workflow: definition.name().clone(),
            status,
            termination,
            results,
            context,
            started_at,
            finished_at: Timestamp::now(),
        }
    }
}
