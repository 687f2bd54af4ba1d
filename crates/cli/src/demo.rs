//! In-process demo workers.
//!
//! The engine treats workers as external collaborators; real deployments
//! supply their own implementations. For exercising definition files from
//! the command line, every worker binding resolves to a [`DemoWorker`] that
//! emits a placeholder value for each key its stage declares — steered by
//! the definition's own gate predicates so gated runs can complete.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use engine::WorkerRegistry;
use serde_json::{json, Value};
use workflow::{
    GatePredicate, StageSpec, Worker, WorkerError, WorkerInput, WorkerOutput, WorkflowDefinition,
};

/// A worker that fabricates its stage's declared outputs.
///
/// For keys tested by an `is_true` or `equals` gate predicate, the demo
/// emits the value the predicate expects; every other key gets a tagged
/// placeholder string.
pub struct DemoWorker {
    definition: Arc<WorkflowDefinition>,
    delay: Duration,
}

#[async_trait]
impl Worker for DemoWorker {
    async fn execute(&self, input: WorkerInput) -> Result<WorkerOutput, WorkerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let Some(spec) = self.stage_spec(&input) else {
            return Err(WorkerError::fatal(format!(
                "demo worker invoked for unknown stage '{}'",
                input.stage
            )));
        };

        Ok(spec
            .produces
            .iter()
            .map(|key| {
                let value = self
                    .expected_value(key)
                    .unwrap_or_else(|| json!(format!("demo output from '{}'", spec.name)));
                (key.clone(), value)
            })
            .collect())
    }
}

impl DemoWorker {
    fn stage_spec(&self, input: &WorkerInput) -> Option<&StageSpec> {
        self.definition
            .stages()
            .iter()
            .chain(self.definition.fallbacks().iter())
            .find(|spec| spec.name == input.stage)
    }

    /// The value some gate predicate expects for `key`, if any.
    fn expected_value(&self, key: &workflow::ContextKey) -> Option<Value> {
        self.definition
            .gates()
            .iter()
            .flat_map(|binding| binding.gate.predicates.iter())
            .find_map(|predicate| match predicate {
                GatePredicate::IsTrue { key: k } if k == key => Some(Value::Bool(true)),
                GatePredicate::Equals { key: k, expected } if k == key => Some(expected.clone()),
                _ => None,
            })
    }
}

/// Builds a registry resolving every worker binding in `definition` to a
/// [`DemoWorker`].
pub fn registry_for(definition: &Arc<WorkflowDefinition>, delay: Duration) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for name in definition.worker_names() {
        registry.register(
            name.clone(),
            Arc::new(DemoWorker {
                definition: definition.clone(),
                delay,
            }),
        );
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use workflow::{
        ContextKey, EscalationPolicy, GateBinding, GateName, QualityGate, RunId, StageName,
        WorkerName, WorkflowName,
    };

    fn key(name: &str) -> ContextKey {
        ContextKey::new(name).unwrap()
    }

    fn definition() -> Arc<WorkflowDefinition> {
        Arc::new(
            WorkflowDefinition::new(
                WorkflowName::new("demo").unwrap(),
                vec![key("issue")],
                vec![StageSpec {
                    name: StageName::new("classify").unwrap(),
                    worker: WorkerName::new("classifier").unwrap(),
                    requires: vec![key("issue")],
                    produces: vec![key("classified"), key("notes")],
                    max_duration: Duration::from_secs(10),
                    retry_limit: 0,
                }],
                vec![],
                vec![GateBinding {
                    after: StageName::new("classify").unwrap(),
                    gate: QualityGate {
                        name: GateName::new("triage-gate").unwrap(),
                        predicates: vec![GatePredicate::IsTrue {
                            key: key("classified"),
                        }],
                    },
                    policy: EscalationPolicy::Abort,
                }],
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn demo_worker_satisfies_gate_predicates() {
        let definition = definition();
        let registry = registry_for(&definition, Duration::ZERO);
        let worker = registry
            .get(&WorkerName::new("classifier").unwrap())
            .unwrap();

        let output = worker
            .execute(WorkerInput {
                run: RunId::new_random(),
                stage: StageName::new("classify").unwrap(),
                attempt: 1,
                context: BTreeMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(output.get(&key("classified")), Some(&Value::Bool(true)));
        assert!(output.get(&key("notes")).unwrap().is_string());
    }
}
