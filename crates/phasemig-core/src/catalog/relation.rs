//! Relationship edges between parent and child objects.

use serde::{Deserialize, Serialize};

use crate::key::{self, KeySpec};
use crate::selection::MatchRule;

/// A parent → child dependency scoped to one phase.
///
/// `relationship_field` is the lookup field on the child pointing at the
/// parent. `parent_key_spec` renders the parent's natural key,
/// `child_key_spec` the child's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipEdge {
    /// Phase the edge belongs to.
    pub phase_number: u32,
    /// Parent (master) object name.
    pub parent_object: String,
    /// Child object name.
    pub child_object: String,
    /// Lookup field on the child.
    pub relationship_field: String,
    /// Natural key of the parent.
    pub parent_key_spec: KeySpec,
    /// Natural key of the child.
    pub child_key_spec: KeySpec,
}

impl RelationshipEdge {
    /// Create an edge.
    pub fn new(
        phase_number: u32,
        parent_object: impl Into<String>,
        child_object: impl Into<String>,
        relationship_field: impl Into<String>,
        parent_key_spec: KeySpec,
        child_key_spec: KeySpec,
    ) -> Self {
        Self {
            phase_number,
            parent_object: parent_object.into(),
            child_object: child_object.into(),
            relationship_field: relationship_field.into(),
            parent_key_spec,
            child_key_spec,
        }
    }

    /// Relationship name the child traverses to reach the parent.
    pub fn relationship_name(&self) -> String {
        key::relationship_name(&self.relationship_field)
    }

    /// Whether the child key spec actually dereferences this edge's relationship.
    pub fn child_key_uses_relationship(&self) -> bool {
        let name = self.relationship_name();
        self.child_key_spec
            .relationship_names()
            .iter()
            .any(|r| *r == name)
    }
}

/// Per-pair override of the generic key-matching rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOverride {
    /// Phase the override applies to.
    pub phase_number: u32,
    /// Parent object.
    pub parent_object: String,
    /// Child object.
    pub child_object: String,
    /// Rule used instead of the generic one.
    pub rule: MatchRule,
}
