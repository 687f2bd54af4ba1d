//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct
//! newtype wrapping a primitive. This prevents accidentally interchanging,
//! for example, a [`StageName`] with a [`WorkerName`] even though both are
//! `String` under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — String-backed (configuration names)
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a workflow definition by its configured name
    /// (e.g. `"bugfix"`, `"feature"`).
    WorkflowName
}

string_id! {
    /// Identifies a stage by its configured name within a workflow.
    ///
    /// Stage names are unique per workflow definition, across the main
    /// sequence and the fallback stages.
    StageName
}

string_id! {
    /// Identifies a worker binding as resolved through the worker registry.
    ///
    /// Several stages may bind the same worker name.
    WorkerName
}

string_id! {
    /// Identifies a quality gate within a workflow definition.
    GateName
}

string_id! {
    /// A key in the execution context.
    ///
    /// Keys are written once, either by the initial invocation arguments or
    /// by exactly one stage, and never overwritten.
    ContextKey
}

// ---------------------------------------------------------------------------
// Identifiers — UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single workflow run (one end-to-end execution of a definition).
///
/// Generated fresh for every invocation; propagated through spans and the
/// final report so all activity from a single run can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`RunId`] from an existing UUID (e.g. deserialised from a report).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_names_are_rejected() {
        assert!(StageName::new("").is_none());
        assert!(ContextKey::new("").is_none());
        assert!(StageName::new("classify").is_some());
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new_random(), RunId::new_random());
    }
}
