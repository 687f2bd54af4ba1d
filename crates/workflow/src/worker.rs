//! The worker port: the trait a unit of work implements to be driven by the
//! engine.
//!
//! Workers are external collaborators. The engine owns sequencing, retries,
//! timeouts, and context merging; a worker only turns an input snapshot into
//! an output payload. Infrastructure crates provide concrete workers; this
//! module defines the contract plus a closure-backed adapter for simple and
//! test workers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WorkerError;
use crate::identifiers::{ContextKey, RunId, StageName};

/// Everything a worker receives for one invocation.
///
/// The context is a snapshot: retries of the same stage all observe the
/// identical map, and nothing a worker does can mutate the run's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInput {
    /// The run this invocation belongs to.
    pub run: RunId,
    /// The stage driving the invocation.
    pub stage: StageName,
    /// 1-based attempt number; 1 on the first try.
    pub attempt: u32,
    /// Snapshot of the accumulated context.
    pub context: BTreeMap<ContextKey, Value>,
}

/// The payload a worker produces on success.
///
/// Validated against the stage's declared output keys at merge time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput(BTreeMap<ContextKey, Value>);

impl WorkerOutput {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one key-value pair, builder style.
    #[must_use]
    pub fn with(mut self, key: ContextKey, value: Value) -> Self {
        self.0.insert(key, value);
        self
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &ContextKey) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of keys in the payload.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the payload, yielding the underlying map.
    pub fn into_map(self) -> BTreeMap<ContextKey, Value> {
        self.0
    }
}

impl FromIterator<(ContextKey, Value)> for WorkerOutput {
    fn from_iter<I: IntoIterator<Item = (ContextKey, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A unit of work invoked by a stage.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Performs the work, turning the input snapshot into an output payload.
    ///
    /// Implementations should return [`WorkerError`] rather than panic; the
    /// error's retry policy drives the executor's retry decision.
    async fn execute(&self, input: WorkerInput) -> Result<WorkerOutput, WorkerError>;
}

/// A worker backed by a plain function or closure.
///
/// Convenient for in-process workers and tests; anything asynchronous or
/// long-running should implement [`Worker`] directly.
pub struct FnWorker<F>
where
    F: Fn(WorkerInput) -> Result<WorkerOutput, WorkerError> + Send + Sync,
{
    func: F,
}

impl<F> FnWorker<F>
where
    F: Fn(WorkerInput) -> Result<WorkerOutput, WorkerError> + Send + Sync,
{
    /// Wraps a closure as a [`Worker`].
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Worker for FnWorker<F>
where
    F: Fn(WorkerInput) -> Result<WorkerOutput, WorkerError> + Send + Sync,
{
    async fn execute(&self, input: WorkerInput) -> Result<WorkerOutput, WorkerError> {
        (self.func)(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> ContextKey {
        ContextKey::new(name).unwrap()
    }

    #[tokio::test]
    async fn fn_worker_passes_input_through() {
        let worker = FnWorker::new(|input: WorkerInput| {
            let issue = input.context.get(&key("issue")).cloned().unwrap();
            Ok(WorkerOutput::new().with(key("echo"), issue))
        });
        let input = WorkerInput {
            run: RunId::new_random(),
            stage: StageName::new("classify").unwrap(),
            attempt: 1,
            context: BTreeMap::from([(key("issue"), json!("bug #42"))]),
        };
        let output = worker.execute(input).await.unwrap();
        assert_eq!(output.get(&key("echo")), Some(&json!("bug #42")));
    }
}
