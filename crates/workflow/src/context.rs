//! The execution context: the key-value record accumulated across stages
//! within one run.
//!
//! The context is append-only. Initial invocation arguments are written at
//! run start; after that the only mutation is [`ExecutionContext::merge_stage_output`],
//! applied by the engine after a stage succeeds. Once a key is written it is
//! never overwritten, so the report can always answer which stage produced
//! which fact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WorkflowError;
use crate::identifiers::{ContextKey, StageName};

/// Who wrote a context entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Supplied by the caller when the run was invoked.
    Initial,
    /// Produced by the named stage.
    Stage(StageName),
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Initial => write!(f, "the initial invocation"),
            Provenance::Stage(stage) => write!(f, "stage '{stage}'"),
        }
    }
}

/// One value in the context together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// The stored value.
    pub value: Value,
    /// Who wrote it.
    pub produced_by: Provenance,
}

/// The accumulated key-value record of one workflow run.
///
/// Exclusively owned by the run driving it; independent runs never share a
/// context, so no locking is needed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<ContextKey, ContextEntry>,
}

impl ExecutionContext {
    /// Creates a context populated from caller-supplied initial arguments.
    pub fn from_initial(arguments: BTreeMap<ContextKey, Value>) -> Self {
        let entries = arguments
            .into_iter()
            .map(|(key, value)| {
                (
                    key,
                    ContextEntry {
                        value,
                        produced_by: Provenance::Initial,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &ContextKey) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Returns `true` if `key` has been written.
    pub fn contains(&self, key: &ContextKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns who wrote `key`, if it has been written.
    pub fn provenance(&self, key: &ContextKey) -> Option<&Provenance> {
        self.entries.get(key).map(|entry| &entry.produced_by)
    }

    /// Returns the number of keys written so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all written keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &ContextKey> {
        self.entries.keys()
    }

    /// Clones the current values into a plain map for a worker invocation.
    ///
    /// Workers receive a snapshot, never the context itself; retries of the
    /// same stage all observe the identical snapshot.
    pub fn snapshot(&self) -> BTreeMap<ContextKey, Value> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Merges a successful stage's output payload into the context.
    ///
    /// The payload is validated against the stage's declared output keys
    /// before anything is written: every declared key must be present, no
    /// undeclared key may appear, and no key may already exist. On any
    /// violation the context is left untouched.
    pub fn merge_stage_output(
        &mut self,
        stage: &StageName,
        declared: &[ContextKey],
        payload: BTreeMap<ContextKey, Value>,
    ) -> Result<(), WorkflowError> {
        let missing: Vec<ContextKey> = declared
            .iter()
            .filter(|key| !payload.contains_key(key))
            .cloned()
            .collect();
        let undeclared: Vec<ContextKey> = payload
            .keys()
            .filter(|key| !declared.contains(key))
            .cloned()
            .collect();
        if !missing.is_empty() || !undeclared.is_empty() {
            return Err(WorkflowError::OutputContract {
                stage: stage.clone(),
                missing,
                undeclared,
            });
        }

        for key in payload.keys() {
            if let Some(entry) = self.entries.get(key) {
                return Err(WorkflowError::ContextConflict {
                    key: key.clone(),
                    existing: entry.produced_by.clone(),
                    incoming: stage.clone(),
                });
            }
        }

        for (key, value) in payload {
            self.entries.insert(
                key,
                ContextEntry {
                    value,
                    produced_by: Provenance::Stage(stage.clone()),
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> ContextKey {
        ContextKey::new(name).unwrap()
    }

    fn stage(name: &str) -> StageName {
        StageName::new(name).unwrap()
    }

    fn initial(pairs: &[(&str, Value)]) -> ExecutionContext {
        ExecutionContext::from_initial(
            pairs
                .iter()
                .map(|(name, value)| (key(name), value.clone()))
                .collect(),
        )
    }

    #[test]
    fn initial_arguments_carry_initial_provenance() {
        let ctx = initial(&[("issue", json!("bug #42"))]);
        assert_eq!(ctx.get(&key("issue")), Some(&json!("bug #42")));
        assert_eq!(ctx.provenance(&key("issue")), Some(&Provenance::Initial));
    }

    #[test]
    fn merge_records_producing_stage() {
        let mut ctx = initial(&[]);
        ctx.merge_stage_output(
            &stage("classify"),
            &[key("classified")],
            BTreeMap::from([(key("classified"), json!(true))]),
        )
        .unwrap();
        assert_eq!(
            ctx.provenance(&key("classified")),
            Some(&Provenance::Stage(stage("classify")))
        );
    }

    #[test]
    fn merge_rejects_overwrite_of_initial_argument() {
        let mut ctx = initial(&[("issue", json!("bug"))]);
        let err = ctx
            .merge_stage_output(
                &stage("classify"),
                &[key("issue")],
                BTreeMap::from([(key("issue"), json!("other"))]),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::ContextConflict {
                existing: Provenance::Initial,
                ..
            }
        ));
        // The original value is untouched.
        assert_eq!(ctx.get(&key("issue")), Some(&json!("bug")));
    }

    #[test]
    fn merge_rejects_overwrite_of_earlier_stage_output() {
        let mut ctx = initial(&[]);
        ctx.merge_stage_output(
            &stage("a"),
            &[key("plan")],
            BTreeMap::from([(key("plan"), json!("v1"))]),
        )
        .unwrap();
        let err = ctx
            .merge_stage_output(
                &stage("b"),
                &[key("plan")],
                BTreeMap::from([(key("plan"), json!("v2"))]),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ContextConflict { .. }));
        assert_eq!(ctx.get(&key("plan")), Some(&json!("v1")));
    }

    #[test]
    fn merge_rejects_missing_declared_key() {
        let mut ctx = initial(&[]);
        let err = ctx
            .merge_stage_output(&stage("classify"), &[key("classified")], BTreeMap::new())
            .unwrap_err();
        match err {
            WorkflowError::OutputContract { missing, .. } => {
                assert_eq!(missing, vec![key("classified")]);
            }
            other => panic!("expected OutputContract, got {other:?}"),
        }
    }

    #[test]
    fn merge_rejects_undeclared_key_and_writes_nothing() {
        let mut ctx = initial(&[]);
        let err = ctx
            .merge_stage_output(
                &stage("classify"),
                &[key("classified")],
                BTreeMap::from([
                    (key("classified"), json!(true)),
                    (key("extra"), json!("surprise")),
                ]),
            )
            .unwrap_err();
        match err {
            WorkflowError::OutputContract { undeclared, .. } => {
                assert_eq!(undeclared, vec![key("extra")]);
            }
            other => panic!("expected OutputContract, got {other:?}"),
        }
        assert!(ctx.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_merges() {
        let mut ctx = initial(&[("issue", json!("bug"))]);
        let snap = ctx.snapshot();
        ctx.merge_stage_output(
            &stage("a"),
            &[key("plan")],
            BTreeMap::from([(key("plan"), json!("p"))]),
        )
        .unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(ctx.len(), 2);
    }
}
