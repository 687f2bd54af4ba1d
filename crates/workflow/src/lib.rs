//! Core orchestration domain for Conductor.
//!
//! This crate contains every domain concept used throughout the engine: the
//! newtype identifiers, the validated workflow definition, the append-only
//! execution context, quality gates, the worker port trait, error types, and
//! the report types a run terminates with.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; the engine and infrastructure crates define
//! *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`StageName`, `ContextKey`, etc.) |
//! | [`types`] | Shared value types (`Timestamp`) |
//! | [`errors`] | Error and retry-policy types |
//! | [`definition`] | `WorkflowDefinition` / `StageSpec` with load-time validation |
//! | [`context`] | The append-only `ExecutionContext` |
//! | [`gate`] | Quality gates, predicates, escalation policy |
//! | [`worker`] | The `Worker` port trait and closure adapter |
//! | [`report`] | `StageResult`, `Termination`, `WorkflowReport` |

pub mod context;
pub mod definition;
pub mod errors;
pub mod gate;
pub mod identifiers;
pub mod report;
pub mod types;
pub mod worker;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use context::{ContextEntry, ExecutionContext, Provenance};
pub use definition::{GateBinding, StageSpec, WorkflowDefinition};
pub use errors::{RetryPolicy, WorkerError, WorkflowError};
pub use gate::{EscalationPolicy, GatePredicate, GateReport, PredicateOutcome, QualityGate};
pub use identifiers::{ContextKey, GateName, RunId, StageName, WorkerName, WorkflowName};
pub use report::{RunStatus, StageResult, StageStatus, Termination, WorkflowReport};
pub use types::Timestamp;
pub use worker::{FnWorker, Worker, WorkerInput, WorkerOutput};
