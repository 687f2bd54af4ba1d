//! Top-level error and retry-policy types for the workflow domain.
//!
//! [`WorkflowError`] covers conditions that prevent a definition from
//! loading or a run from proceeding. Per-stage worker errors are captured
//! into stage results rather than raised, so a run always terminates with a
//! structured report; see [`WorkerError`] for the worker-facing type.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Provenance;
use crate::identifiers::{ContextKey, StageName, WorkerName};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether a worker error is safe to retry and, if so, after what delay.
///
/// Returned by [`WorkerError`] to let the stage executor decide whether to
/// re-invoke the worker without escalating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The invocation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying.
    /// `None` means the executor applies its own fixed delay.
    Retryable {
        /// Minimum back-off before the next attempt.
        after: Option<Duration>,
    },
    /// The invocation must not be retried; the stage fails immediately even
    /// if the retry budget is not exhausted.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Workflow-level errors
// ---------------------------------------------------------------------------

/// Errors that prevent a definition from loading or a run from proceeding.
///
/// `Configuration` is fatal at load time, before any run starts. The
/// remaining variants are produced while a run is in flight and are captured
/// into the stage result / termination record of the report rather than
/// propagated as panics.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum WorkflowError {
    /// The workflow definition is internally inconsistent.
    ///
    /// Produced at load time; the engine never starts a run with an invalid
    /// definition.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A stage was reached without one or more of its required input keys
    /// present in the execution context.
    ///
    /// Fatal for the run; never retried at the engine level.
    #[error("stage '{stage}' is missing required inputs: {}", join_keys(.keys))]
    MissingInput {
        /// The stage whose input contract was violated.
        stage: StageName,
        /// The required keys absent from the context.
        keys: Vec<ContextKey>,
    },

    /// A stage attempted to write a context key that already exists.
    ///
    /// Keys are written once and never overwritten; this preserves the audit
    /// trail of which stage produced which fact.
    #[error("context conflict on key '{key}': already written by {existing}, attempted by stage '{incoming}'")]
    ContextConflict {
        /// The key that already exists.
        key: ContextKey,
        /// Who wrote the existing entry.
        existing: Provenance,
        /// The stage that attempted the overwrite.
        incoming: StageName,
    },

    /// A stage's output payload did not match its declared output keys.
    ///
    /// Every declared key must be present and no undeclared key may appear;
    /// the implicit contract of the worker is made explicit at merge time.
    #[error(
        "stage '{stage}' violated its output contract \
         (missing: [{}], undeclared: [{}])",
        join_keys(.missing),
        join_keys(.undeclared)
    )]
    OutputContract {
        /// The stage whose payload was rejected.
        stage: StageName,
        /// Declared keys absent from the payload.
        missing: Vec<ContextKey>,
        /// Payload keys that were never declared.
        undeclared: Vec<ContextKey>,
    },

    /// A stage binds a worker name with no registered implementation.
    ///
    /// Detected before the first stage runs; the run never starts.
    #[error("no worker registered under name '{name}'")]
    UnknownWorker {
        /// The unresolvable worker binding.
        name: WorkerName,
    },
}

impl WorkflowError {
    /// Convenience constructor for [`WorkflowError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

fn join_keys(keys: &[ContextKey]) -> String {
    keys.iter()
        .map(ContextKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Worker-facing errors
// ---------------------------------------------------------------------------

/// An error reported by a worker invocation.
///
/// Carries the retry policy so the stage executor can distinguish transient
/// failures (retried against the stage's retry budget) from permanent ones
/// (fail the stage immediately).
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct WorkerError {
    /// Human-readable description of the failure.
    pub message: String,
    /// Whether the invocation may be retried.
    pub policy: RetryPolicy,
}

impl WorkerError {
    /// Creates a retryable error with no worker-imposed back-off.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            policy: RetryPolicy::Retryable { after: None },
        }
    }

    /// Creates a retryable error with a minimum back-off before the next attempt.
    pub fn retryable_after(message: impl Into<String>, after: Duration) -> Self {
        Self {
            message: message.into(),
            policy: RetryPolicy::Retryable { after: Some(after) },
        }
    }

    /// Creates an error that must not be retried.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            policy: RetryPolicy::NonRetryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_lists_every_key() {
        let err = WorkflowError::MissingInput {
            stage: StageName::new("implement").unwrap(),
            keys: vec![
                ContextKey::new("plan").unwrap(),
                ContextKey::new("classified").unwrap(),
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("plan"));
        assert!(rendered.contains("classified"));
    }

    #[test]
    fn worker_error_constructors_set_policy() {
        assert_eq!(
            WorkerError::retryable("boom").policy,
            RetryPolicy::Retryable { after: None }
        );
        assert_eq!(WorkerError::fatal("boom").policy, RetryPolicy::NonRetryable);
    }
}
