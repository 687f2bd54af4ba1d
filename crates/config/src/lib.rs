//! Workflow definition files.
//!
//! Definitions are written as TOML, deserialized into raw serde structs, and
//! converted into validated [`workflow::WorkflowDefinition`] values. All
//! domain consistency rules live in the `workflow` crate; this crate owns
//! only the file format.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File reading and TOML details live here; the domain
//! crate never sees them.
//!
//! ## Format
//!
//! ```toml
//! name = "bugfix"
//! parameters = ["issue"]
//!
//! [[stage]]
//! name = "classify"
//! worker = "classifier"
//! requires = ["issue"]
//! produces = ["classified"]
//! max_duration_secs = 120
//! retries = 2
//!
//! [[gate]]
//! name = "triage-gate"
//! after = "classify"
//! [gate.policy]
//! abort = true
//! [[gate.predicate]]
//! kind = "is_true"
//! key = "classified"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use workflow::{
    ContextKey, EscalationPolicy, GateBinding, GateName, GatePredicate, QualityGate, StageName,
    StageSpec, WorkerName, WorkflowDefinition, WorkflowError, WorkflowName,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors loading a workflow definition file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read '{path}': {source}")]
    Io {
        /// The file that was being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("failed to parse workflow definition: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but describes an invalid definition.
    #[error(transparent)]
    Invalid(#[from] WorkflowError),
}

// ---------------------------------------------------------------------------
// Raw file schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefinition {
    name: String,
    #[serde(default)]
    parameters: Vec<String>,
    #[serde(default, rename = "stage")]
    stages: Vec<RawStage>,
    #[serde(default, rename = "fallback")]
    fallbacks: Vec<RawStage>,
    #[serde(default, rename = "gate")]
    gates: Vec<RawGate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStage {
    name: String,
    worker: String,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    produces: Vec<String>,
    max_duration_secs: u64,
    #[serde(default)]
    retries: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGate {
    name: String,
    after: String,
    policy: RawPolicy,
    #[serde(default, rename = "predicate")]
    predicates: Vec<RawPredicate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicy {
    #[serde(default)]
    abort: bool,
    fallback: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPredicate {
    kind: RawPredicateKind,
    key: String,
    expected: Option<toml::Value>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawPredicateKind {
    Exists,
    Equals,
    IsTrue,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Reads and validates a workflow definition file.
pub fn load_definition(path: &Path) -> Result<WorkflowDefinition, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_definition(&text)
}

/// Parses and validates a workflow definition from TOML text.
pub fn parse_definition(text: &str) -> Result<WorkflowDefinition, ConfigError> {
    let raw: RawDefinition = toml::from_str(text)?;

    let name = require(WorkflowName::new(&raw.name), "workflow name")?;
    let parameters = raw
        .parameters
        .iter()
        .map(|key| require(ContextKey::new(key), "parameter key"))
        .collect::<Result<Vec<_>, _>>()?;
    let stages = raw
        .stages
        .iter()
        .map(convert_stage)
        .collect::<Result<Vec<_>, _>>()?;
    let fallbacks = raw
        .fallbacks
        .iter()
        .map(convert_stage)
        .collect::<Result<Vec<_>, _>>()?;
    let gates = raw
        .gates
        .iter()
        .map(convert_gate)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WorkflowDefinition::new(
        name, parameters, stages, fallbacks, gates,
    )?)
}

fn convert_stage(raw: &RawStage) -> Result<StageSpec, ConfigError> {
    Ok(StageSpec {
        name: require(StageName::new(&raw.name), "stage name")?,
        worker: require(WorkerName::new(&raw.worker), "worker name")?,
        requires: raw
            .requires
            .iter()
            .map(|key| require(ContextKey::new(key), "required key"))
            .collect::<Result<Vec<_>, _>>()?,
        produces: raw
            .produces
            .iter()
            .map(|key| require(ContextKey::new(key), "produced key"))
            .collect::<Result<Vec<_>, _>>()?,
        max_duration: Duration::from_secs(raw.max_duration_secs),
        retry_limit: raw.retries,
    })
}

fn convert_gate(raw: &RawGate) -> Result<GateBinding, ConfigError> {
    let policy = match (&raw.policy.fallback, raw.policy.abort) {
        (Some(stage), false) => EscalationPolicy::Fallback {
            stage: require(StageName::new(stage), "fallback stage name")?,
        },
        (None, true) => EscalationPolicy::Abort,
        _ => {
            return Err(WorkflowError::configuration(format!(
                "gate '{}' must declare exactly one policy: 'abort = true' or 'fallback = \"...\"'",
                raw.name
            ))
            .into());
        }
    };

    Ok(GateBinding {
        after: require(StageName::new(&raw.after), "gate 'after' stage")?,
        gate: QualityGate {
            name: require(GateName::new(&raw.name), "gate name")?,
            predicates: raw
                .predicates
                .iter()
                .map(convert_predicate)
                .collect::<Result<Vec<_>, _>>()?,
        },
        policy,
    })
}

fn convert_predicate(raw: &RawPredicate) -> Result<GatePredicate, ConfigError> {
    let key = require(ContextKey::new(&raw.key), "predicate key")?;
    match (raw.kind, &raw.expected) {
        (RawPredicateKind::Exists, None) => Ok(GatePredicate::Exists { key }),
        (RawPredicateKind::IsTrue, None) => Ok(GatePredicate::IsTrue { key }),
        (RawPredicateKind::Equals, Some(value)) => Ok(GatePredicate::Equals {
            key,
            // toml::Value serializes losslessly into a JSON value.
            expected: serde_json::to_value(value).map_err(|err| {
                WorkflowError::configuration(format!(
                    "predicate on '{}' has an unrepresentable expected value: {err}",
                    raw.key
                ))
            })?,
        }),
        (RawPredicateKind::Equals, None) => Err(WorkflowError::configuration(format!(
            "equals predicate on '{}' is missing 'expected'",
            raw.key
        ))
        .into()),
        (_, Some(_)) => Err(WorkflowError::configuration(format!(
            "predicate on '{}' does not take 'expected'",
            raw.key
        ))
        .into()),
    }
}

fn require<T>(value: Option<T>, what: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| WorkflowError::configuration(format!("{what} must not be empty")).into())
}
