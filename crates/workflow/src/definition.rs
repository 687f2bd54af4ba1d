//! Workflow definitions: the ordered stage list, gate bindings, and fallback
//! stages, validated for internal consistency at load time.
//!
//! A definition is immutable once constructed. [`WorkflowDefinition::new`]
//! runs the full consistency check and refuses to produce a definition the
//! engine could not execute: the engine never starts a run with an invalid
//! definition.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use serde::Serialize;

use crate::errors::WorkflowError;
use crate::gate::{EscalationPolicy, QualityGate};
use crate::identifiers::{ContextKey, StageName, WorkerName, WorkflowName};

// ---------------------------------------------------------------------------
// Stage specification
// ---------------------------------------------------------------------------

/// One step in the workflow: a worker binding with its input/output contract
/// and execution limits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSpec {
    /// Stage name, unique within the definition.
    pub name: StageName,
    /// The worker this stage invokes, resolved through the worker registry.
    pub worker: WorkerName,
    /// Context keys that must exist before the worker is invoked.
    pub requires: Vec<ContextKey>,
    /// Context keys the worker's output payload must contain, exactly.
    pub produces: Vec<ContextKey>,
    /// Maximum wall-clock duration of one worker invocation.
    pub max_duration: Duration,
    /// Number of retries after the first failed attempt. Zero means the
    /// first failure is final.
    pub retry_limit: u32,
}

// ---------------------------------------------------------------------------
// Gate binding
// ---------------------------------------------------------------------------

/// A quality gate attached after a named stage, with its escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateBinding {
    /// The main-sequence stage after which the gate is evaluated.
    pub after: StageName,
    /// The gate itself.
    pub gate: QualityGate,
    /// What to do when the gate fails.
    pub policy: EscalationPolicy,
}

// ---------------------------------------------------------------------------
// Workflow definition
// ---------------------------------------------------------------------------

/// An ordered, validated sequence of stages with gates and fallback stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowDefinition {
    name: WorkflowName,
    parameters: Vec<ContextKey>,
    stages: Vec<StageSpec>,
    fallbacks: Vec<StageSpec>,
    gates: Vec<GateBinding>,
}

impl WorkflowDefinition {
    /// Builds a definition, validating internal consistency.
    ///
    /// Fails with [`WorkflowError::Configuration`] if any stage requires an
    /// input key not produced by an earlier stage nor declared as a
    /// parameter, if two stages declare the same output key, or if a gate or
    /// fallback reference cannot be satisfied.
    pub fn new(
        name: WorkflowName,
        parameters: Vec<ContextKey>,
        stages: Vec<StageSpec>,
        fallbacks: Vec<StageSpec>,
        gates: Vec<GateBinding>,
    ) -> Result<Self, WorkflowError> {
        let definition = Self {
            name,
            parameters,
            stages,
            fallbacks,
            gates,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// The workflow's configured name.
    pub fn name(&self) -> &WorkflowName {
        &self.name
    }

    /// Context keys the caller must supply as initial arguments.
    pub fn parameters(&self) -> &[ContextKey] {
        &self.parameters
    }

    /// The main stage sequence, in execution order.
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Stages reachable only through gate escalation.
    pub fn fallbacks(&self) -> &[StageSpec] {
        &self.fallbacks
    }

    /// All gate bindings, in declaration order.
    pub fn gates(&self) -> &[GateBinding] {
        &self.gates
    }

    /// Gate bindings evaluated after the named stage, in declaration order.
    pub fn gates_after<'a>(
        &'a self,
        stage: &'a StageName,
    ) -> impl Iterator<Item = &'a GateBinding> {
        self.gates.iter().filter(move |binding| binding.after == *stage)
    }

    /// Looks up a fallback stage by name.
    pub fn fallback_stage(&self, name: &StageName) -> Option<&StageSpec> {
        self.fallbacks.iter().find(|spec| spec.name == *name)
    }

    /// The distinct worker names bound by any stage, main or fallback.
    pub fn worker_names(&self) -> BTreeSet<&WorkerName> {
        self.stages
            .iter()
            .chain(self.fallbacks.iter())
            .map(|spec| &spec.worker)
            .collect()
    }

    // -- validation ---------------------------------------------------------

    fn validate(&self) -> Result<(), WorkflowError> {
        if self.stages.is_empty() {
            return Err(WorkflowError::configuration(
                "a workflow must declare at least one stage",
            ));
        }

        let mut seen_stages = HashSet::new();
        for spec in self.stages.iter().chain(self.fallbacks.iter()) {
            if !seen_stages.insert(&spec.name) {
                return Err(WorkflowError::configuration(format!(
                    "duplicate stage name '{}'",
                    spec.name
                )));
            }
            if spec.max_duration.is_zero() {
                return Err(WorkflowError::configuration(format!(
                    "stage '{}' has a zero maximum duration",
                    spec.name
                )));
            }
        }

        let mut seen_keys: HashSet<&ContextKey> = HashSet::new();
        for key in &self.parameters {
            if !seen_keys.insert(key) {
                return Err(WorkflowError::configuration(format!(
                    "duplicate parameter key '{key}'"
                )));
            }
        }
        // The context is append-only, so a key declared by two producers can
        // never merge; reject the definition instead of failing mid-run.
        for spec in self.stages.iter().chain(self.fallbacks.iter()) {
            for key in &spec.produces {
                if !seen_keys.insert(key) {
                    return Err(WorkflowError::configuration(format!(
                        "output key '{key}' of stage '{}' is already produced elsewhere",
                        spec.name
                    )));
                }
            }
        }

        self.validate_input_coverage()?;
        self.validate_gates()?;
        Ok(())
    }

    /// Every stage's required inputs must be covered by the parameters plus
    /// the outputs of all earlier stages in the main sequence.
    fn validate_input_coverage(&self) -> Result<(), WorkflowError> {
        let mut available: HashSet<&ContextKey> = self.parameters.iter().collect();
        for spec in &self.stages {
            let unsatisfied: Vec<&ContextKey> = spec
                .requires
                .iter()
                .filter(|key| !available.contains(key))
                .collect();
            if let Some(key) = unsatisfied.first() {
                return Err(WorkflowError::configuration(format!(
                    "stage '{}' requires key '{key}' which no earlier stage \
                     produces and no parameter supplies",
                    spec.name
                )));
            }
            available.extend(spec.produces.iter());
        }
        Ok(())
    }

    fn validate_gates(&self) -> Result<(), WorkflowError> {
        let mut seen_gates = HashSet::new();
        let mut referenced_fallbacks: HashSet<&StageName> = HashSet::new();

        for binding in &self.gates {
            if !seen_gates.insert(&binding.gate.name) {
                return Err(WorkflowError::configuration(format!(
                    "duplicate gate name '{}'",
                    binding.gate.name
                )));
            }

            let Some(position) = self
                .stages
                .iter()
                .position(|spec| spec.name == binding.after)
            else {
                return Err(WorkflowError::configuration(format!(
                    "gate '{}' is bound after unknown stage '{}' \
                     (gates cannot follow fallback stages)",
                    binding.gate.name, binding.after
                )));
            };

            if let EscalationPolicy::Fallback { stage } = &binding.policy {
                let Some(fallback) = self.fallback_stage(stage) else {
                    return Err(WorkflowError::configuration(format!(
                        "gate '{}' routes to unknown fallback stage '{stage}'",
                        binding.gate.name
                    )));
                };
                referenced_fallbacks.insert(stage);

                // The fallback runs right after the gate; its inputs must be
                // satisfiable at that point in the sequence.
                let available: HashSet<&ContextKey> = self
                    .parameters
                    .iter()
                    .chain(
                        self.stages[..=position]
                            .iter()
                            .flat_map(|spec| spec.produces.iter()),
                    )
                    .collect();
                if let Some(key) = fallback
                    .requires
                    .iter()
                    .find(|key| !available.contains(key))
                {
                    return Err(WorkflowError::configuration(format!(
                        "fallback stage '{stage}' requires key '{key}' which is \
                         not available at gate '{}'",
                        binding.gate.name
                    )));
                }
            }
        }

        for spec in &self.fallbacks {
            if !referenced_fallbacks.contains(&spec.name) {
                return Err(WorkflowError::configuration(format!(
                    "fallback stage '{}' is not referenced by any gate",
                    spec.name
                )));
            }
        }
        Ok(())
    }
}
