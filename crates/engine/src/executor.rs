//! The stage executor: wraps one worker invocation with the stage's input
//! contract, timeout, retry budget, and cancellation.
//!
//! The executor never touches the execution context. It receives a read-only
//! view, hands the worker a snapshot, and returns a [`StageResult`]; the
//! engine merges output only when the status is success.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use workflow::{
    ExecutionContext, RetryPolicy, RunId, StageResult, StageSpec, StageStatus, Timestamp, Worker,
    WorkerInput, WorkerOutput, WorkflowError,
};

/// Default fixed delay between retry attempts when the worker's error does
/// not impose its own back-off.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Executes single stages against a worker.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    retry_delay: Duration,
}

impl Default for StageExecutor {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl StageExecutor {
    /// Creates an executor with the default retry delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor with a custom fixed retry delay.
    pub fn with_retry_delay(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    /// Invokes the stage's worker and returns the structured outcome.
    ///
    /// - Missing required inputs fail the stage before the worker is invoked.
    /// - Worker failures are retried up to the stage's retry limit; each
    ///   retry is a fresh invocation with the same context snapshot. A
    ///   non-retryable error short-circuits the budget.
    /// - A worker that does not return within the stage's maximum duration
    ///   is cancelled and yields status timeout. Timeouts are never retried.
    /// - Run-level cancellation observed before or during an attempt yields
    ///   status cancelled.
    pub async fn execute(
        &self,
        run: RunId,
        spec: &StageSpec,
        worker: &dyn Worker,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StageResult {
        let started_at = Timestamp::now();
        let start = tokio::time::Instant::now();

        let missing: Vec<_> = spec
            .requires
            .iter()
            .filter(|key| !context.contains(key))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let error = WorkflowError::MissingInput {
                stage: spec.name.clone(),
                keys: missing,
            };
            tracing::error!(run = %run, stage = %spec.name, %error, "stage inputs missing");
            return self.result(
                spec,
                StageStatus::Failure,
                0,
                None,
                Some(error.to_string()),
                start,
                started_at,
            );
        }

        let snapshot = context.snapshot();
        let max_attempts = spec.retry_limit + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return self.result(
                    spec,
                    StageStatus::Cancelled,
                    attempt - 1,
                    None,
                    Some("run cancelled before worker invocation".into()),
                    start,
                    started_at,
                );
            }

            let input = WorkerInput {
                run,
                stage: spec.name.clone(),
                attempt,
                context: snapshot.clone(),
            };
            tracing::debug!(run = %run, stage = %spec.name, attempt, "invoking worker");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    return self.result(
                        spec,
                        StageStatus::Cancelled,
                        attempt,
                        None,
                        Some("run cancelled during worker invocation".into()),
                        start,
                        started_at,
                    );
                }
                outcome = tokio::time::timeout(spec.max_duration, worker.execute(input)) => outcome,
            };

            match outcome {
                Err(_elapsed) => {
                    tracing::warn!(
                        run = %run,
                        stage = %spec.name,
                        max_duration_ms = spec.max_duration.as_millis() as u64,
                        "worker timed out"
                    );
                    return self.result(
                        spec,
                        StageStatus::Timeout,
                        attempt,
                        None,
                        Some(format!(
                            "worker did not return within {:?}",
                            spec.max_duration
                        )),
                        start,
                        started_at,
                    );
                }
                Ok(Ok(output)) => {
                    return self.result(
                        spec,
                        StageStatus::Success,
                        attempt,
                        Some(output),
                        None,
                        start,
                        started_at,
                    );
                }
                Ok(Err(error)) => {
                    let budget_left = attempt < max_attempts;
                    match &error.policy {
                        RetryPolicy::Retryable { after } if budget_left => {
                            let delay = (*after).unwrap_or(self.retry_delay);
                            tracing::warn!(
                                run = %run,
                                stage = %spec.name,
                                attempt,
                                %error,
                                delay_ms = delay.as_millis() as u64,
                                "worker failed; retrying"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    return self.result(
                                        spec,
                                        StageStatus::Cancelled,
                                        attempt,
                                        None,
                                        Some("run cancelled while waiting to retry".into()),
                                        start,
                                        started_at,
                                    );
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        _ => {
                            tracing::error!(
                                run = %run,
                                stage = %spec.name,
                                attempt,
                                %error,
                                "worker failed; stage aborted"
                            );
                            return self.result(
                                spec,
                                StageStatus::Failure,
                                attempt,
                                None,
                                Some(error.message),
                                start,
                                started_at,
                            );
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn result(
        &self,
        spec: &StageSpec,
        status: StageStatus,
        attempts: u32,
        output: Option<WorkerOutput>,
        error: Option<String>,
        start: tokio::time::Instant,
        started_at: Timestamp,
    ) -> StageResult {
        StageResult {
            stage: spec.name.clone(),
            status,
            attempts,
            output,
            error,
            duration: start.elapsed(),
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use workflow::{ContextKey, StageName, WorkerError, WorkerName};

    fn key(name: &str) -> ContextKey {
        ContextKey::new(name).unwrap()
    }

    fn spec(retry_limit: u32) -> StageSpec {
        StageSpec {
            name: StageName::new("classify").unwrap(),
            worker: WorkerName::new("classifier").unwrap(),
            requires: vec![key("issue")],
            produces: vec![key("classified")],
            max_duration: Duration::from_secs(5),
            retry_limit,
        }
    }

    fn context() -> ExecutionContext {
        ExecutionContext::from_initial(BTreeMap::from([(key("issue"), json!("bug #42"))]))
    }

    /// Fails the first `failures` invocations with a retryable error, then
    /// succeeds. Counts every call.
    struct FlakyWorker {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyWorker {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Worker for FlakyWorker {
        async fn execute(&self, _input: WorkerInput) -> Result<WorkerOutput, WorkerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(WorkerError::retryable(format!("transient failure #{call}")))
            } else {
                Ok(WorkerOutput::new().with(key("classified"), json!(true)))
            }
        }
    }

    struct NeverReturns;

    #[async_trait]
    impl Worker for NeverReturns {
        async fn execute(&self, _input: WorkerInput) -> Result<WorkerOutput, WorkerError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_input_fails_without_invoking_the_worker() {
        let worker = FlakyWorker::new(0);
        let executor = StageExecutor::new();
        let empty = ExecutionContext::default();

        let result = executor
            .execute(
                RunId::new_random(),
                &spec(2),
                &worker,
                &empty,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.status, StageStatus::Failure);
        assert_eq!(result.attempts, 0);
        assert!(result.error.as_deref().unwrap().contains("issue"));
        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success_within_retry_budget() {
        let worker = FlakyWorker::new(2);
        let executor = StageExecutor::new();

        let result = executor
            .execute(
                RunId::new_random(),
                &spec(2),
                &worker,
                &context(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.attempts, 3);
        assert_eq!(
            result.output.unwrap().get(&key("classified")),
            Some(&json!(true))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_last_error() {
        let worker = FlakyWorker::new(10);
        let executor = StageExecutor::new();

        let result = executor
            .execute(
                RunId::new_random(),
                &spec(1),
                &worker,
                &context(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.status, StageStatus::Failure);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.error.as_deref(), Some("transient failure #2"));
        assert_eq!(worker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_short_circuits_the_budget() {
        struct FatalWorker;

        #[async_trait]
        impl Worker for FatalWorker {
            async fn execute(&self, _input: WorkerInput) -> Result<WorkerOutput, WorkerError> {
                Err(WorkerError::fatal("invalid credentials"))
            }
        }

        let result = StageExecutor::new()
            .execute(
                RunId::new_random(),
                &spec(5),
                &FatalWorker,
                &context(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.status, StageStatus::Failure);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error.as_deref(), Some("invalid credentials"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_worker_times_out_and_is_not_retried() {
        let stage = spec(3);
        let result = StageExecutor::new()
            .execute(
                RunId::new_random(),
                &stage,
                &NeverReturns,
                &context(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.status, StageStatus::Timeout);
        assert_eq!(result.attempts, 1);
        assert!(result.output.is_none());
        assert!(result.duration >= stage.max_duration);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_before_the_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let worker = FlakyWorker::new(0);

        let result = StageExecutor::new()
            .execute(RunId::new_random(), &spec(0), &worker, &context(), &token)
            .await;

        assert_eq!(result.status, StageStatus::Cancelled);
        assert_eq!(result.attempts, 0);
        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_invocation_cancels_the_in_flight_call() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = StageExecutor::new()
            .execute(
                RunId::new_random(),
                &spec(0),
                &NeverReturns,
                &context(),
                &token,
            )
            .await;

        assert_eq!(result.status, StageStatus::Cancelled);
        assert_eq!(result.attempts, 1);
        assert!(result.output.is_none());
    }
}
