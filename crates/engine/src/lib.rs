//! Conductor workflow engine.
//!
//! This crate drives workflow runs: the [`StageExecutor`] wraps a single
//! worker invocation with the stage's input contract, timeout, retry budget,
//! and cancellation; the [`WorkflowEngine`] sequences stages, merges
//! successful outputs into the run's context, evaluates quality gates, and
//! produces the terminal [`workflow::WorkflowReport`].
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The engine sequences calls between the domain
//! rules in the [`workflow`] crate and the workers supplied through the
//! [`WorkerRegistry`]. It contains no domain rules of its own.

pub mod engine;
pub mod executor;
pub mod registry;

pub use engine::WorkflowEngine;
pub use executor::StageExecutor;
pub use registry::WorkerRegistry;
