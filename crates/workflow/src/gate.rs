//! Quality gates: checkpoints enforcing predicates over the execution
//! context before a run may proceed.
//!
//! Gate evaluation is pure and side-effect-free. Every predicate is always
//! evaluated, never short-circuited, so a failing gate reports the complete
//! picture rather than just the first failing predicate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::identifiers::{ContextKey, GateName, StageName};

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// A boolean predicate over the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePredicate {
    /// The key has been written, with any value.
    Exists {
        /// Key that must exist.
        key: ContextKey,
    },
    /// The key holds exactly the expected JSON value.
    Equals {
        /// Key to compare.
        key: ContextKey,
        /// Value the key must hold.
        expected: Value,
    },
    /// The key holds the boolean `true`.
    IsTrue {
        /// Key that must hold `true`.
        key: ContextKey,
    },
}

impl GatePredicate {
    /// Human-readable description of what the predicate demands.
    pub fn describe(&self) -> String {
        match self {
            GatePredicate::Exists { key } => format!("'{key}' exists"),
            GatePredicate::Equals { key, expected } => format!("'{key}' == {expected}"),
            GatePredicate::IsTrue { key } => format!("'{key}' is true"),
        }
    }

    /// Evaluates the predicate against the context.
    pub fn evaluate(&self, context: &ExecutionContext) -> PredicateOutcome {
        let (passed, detail) = match self {
            GatePredicate::Exists { key } => match context.contains(key) {
                true => (true, None),
                false => (false, Some(format!("key '{key}' was never written"))),
            },
            GatePredicate::Equals { key, expected } => match context.get(key) {
                Some(actual) if actual == expected => (true, None),
                Some(actual) => (false, Some(format!("'{key}' holds {actual}"))),
                None => (false, Some(format!("key '{key}' was never written"))),
            },
            GatePredicate::IsTrue { key } => match context.get(key) {
                Some(Value::Bool(true)) => (true, None),
                Some(actual) => (false, Some(format!("'{key}' holds {actual}"))),
                None => (false, Some(format!("key '{key}' was never written"))),
            },
        };
        PredicateOutcome {
            predicate: self.describe(),
            passed,
            detail,
        }
    }
}

/// The evaluated state of one predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateOutcome {
    /// Description of the predicate that was evaluated.
    pub predicate: String,
    /// Whether it held.
    pub passed: bool,
    /// What was actually observed, for failing predicates.
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

/// A named set of predicates evaluated at a specific point in the sequence.
///
/// All predicates must hold for the run to proceed past the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    /// Gate name, used in reports and logs.
    pub name: GateName,
    /// Predicates that must all hold.
    pub predicates: Vec<GatePredicate>,
}

impl QualityGate {
    /// Evaluates every predicate against the context.
    pub fn evaluate(&self, context: &ExecutionContext) -> GateReport {
        let outcomes = self
            .predicates
            .iter()
            .map(|predicate| predicate.evaluate(context))
            .collect();
        GateReport {
            gate: self.name.clone(),
            outcomes,
        }
    }
}

/// The result of evaluating one gate: every predicate's individual outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    /// The gate that was evaluated.
    pub gate: GateName,
    /// One outcome per predicate, in declaration order.
    pub outcomes: Vec<PredicateOutcome>,
}

impl GateReport {
    /// Returns `true` if every predicate held.
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.passed)
    }

    /// Returns the failing outcomes.
    pub fn failures(&self) -> Vec<PredicateOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.passed)
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Escalation
// ---------------------------------------------------------------------------

/// What the engine does when a gate fails.
///
/// Gates are never silently retried; a failing gate either aborts the run or
/// routes to a declared fallback stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPolicy {
    /// Terminate the run, reporting every failing predicate.
    Abort,
    /// Insert the named fallback stage at the front of the remaining
    /// sequence and continue.
    Fallback {
        /// The fallback stage to route to.
        stage: StageName,
    },
}
