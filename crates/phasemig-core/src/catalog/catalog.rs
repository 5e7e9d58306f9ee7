//! The relationship catalog: phases, edges and match-rule overrides.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{MatchOverride, PhaseDefinition, PhaseEntry, RelationshipEdge};
use crate::error::{CatalogError, Error};
use crate::selection::MatchRule;

/// Built-in configuration-product catalog.
const BUILTIN_CATALOG: &str = include_str!("../../catalog/cpq.json");

/// Static, declarative description of migration phases and their relationships.
///
/// Lookups never fail: an unknown phase or object yields an empty result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipCatalog {
    /// Phases in declaration order.
    pub phases: Vec<PhaseEntry>,
    /// Parent → child edges.
    #[serde(default)]
    pub edges: Vec<RelationshipEdge>,
    /// Per-pair match rule overrides.
    #[serde(default)]
    pub match_overrides: Vec<MatchOverride>,
}

impl RelationshipCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog shipped with the crate, validated.
    pub fn builtin() -> Result<Self, Error> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    /// Parse and validate a catalog from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let catalog: Self = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read, parse and validate a catalog file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Add a phase.
    pub fn with_phase(mut self, phase: PhaseEntry) -> Self {
        self.phases.push(phase);
        self
    }

    /// Add an edge.
    pub fn with_edge(mut self, edge: RelationshipEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Override the match rule for a parent/child pair in a phase.
    pub fn with_match_override(
        mut self,
        phase_number: u32,
        parent_object: impl Into<String>,
        child_object: impl Into<String>,
        rule: MatchRule,
    ) -> Self {
        self.match_overrides.push(MatchOverride {
            phase_number,
            parent_object: parent_object.into(),
            child_object: child_object.into(),
            rule,
        });
        self
    }

    /// Get a phase by number.
    pub fn phase(&self, phase_number: u32) -> Option<&PhaseEntry> {
        self.phases.iter().find(|p| p.phase_number == phase_number)
    }

    /// Phase numbers in ascending order.
    pub fn phase_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self.phases.iter().map(|p| p.phase_number).collect();
        numbers.sort_unstable();
        numbers
    }

    /// Phase definitions in ascending phase order.
    pub fn phase_definitions(&self, include_derived: bool) -> Vec<PhaseDefinition> {
        let mut definitions: Vec<PhaseDefinition> = self
            .phases
            .iter()
            .map(|p| p.definition(include_derived))
            .collect();
        definitions.sort_by_key(|d| d.phase_number);
        definitions
    }

    /// Master objects the operator can select records from.
    pub fn selectable_masters_for_phase(&self, phase_number: u32) -> Vec<&str> {
        self.phase(phase_number)
            .map(|p| p.objects.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Edges whose parent is `parent_object` in the phase.
    pub fn edges_for_parent(
        &self,
        phase_number: u32,
        parent_object: &str,
    ) -> Vec<&RelationshipEdge> {
        self.edges
            .iter()
            .filter(|e| e.phase_number == phase_number && e.parent_object == parent_object)
            .collect()
    }

    /// Edges whose child is `child_object` in the phase.
    pub fn edges_for_child(&self, phase_number: u32, child_object: &str) -> Vec<&RelationshipEdge> {
        self.edges
            .iter()
            .filter(|e| e.phase_number == phase_number && e.child_object == child_object)
            .collect()
    }

    /// The edge between a parent and a child in the phase.
    pub fn edge(
        &self,
        phase_number: u32,
        parent_object: &str,
        child_object: &str,
    ) -> Option<&RelationshipEdge> {
        self.edges.iter().find(|e| {
            e.phase_number == phase_number
                && e.parent_object == parent_object
                && e.child_object == child_object
        })
    }

    /// Match rule for a parent/child pair; generic unless overridden.
    pub fn match_rule(
        &self,
        phase_number: u32,
        parent_object: &str,
        child_object: &str,
    ) -> MatchRule {
        self.match_overrides
            .iter()
            .find(|o| {
                o.phase_number == phase_number
                    && o.parent_object == parent_object
                    && o.child_object == child_object
            })
            .map(|o| o.rule)
            .unwrap_or_default()
    }

    /// Check internal consistency.
    ///
    /// Every edge must reference a declared phase, both its objects must belong
    /// to that phase, and its child key spec must traverse the edge's
    /// relationship. A parent and child pair has at most one edge per phase.
    /// Every match override must name an existing edge.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for phase in &self.phases {
            if !seen.insert(phase.phase_number) {
                return Err(CatalogError::DuplicatePhase(phase.phase_number));
            }
        }

        let mut problems = Vec::new();

        for phase in &self.phases {
            if phase.objects.is_empty() {
                problems.push(format!(
                    "phase {} has no selectable objects",
                    phase.phase_number
                ));
            }
        }

        let mut seen_edges = HashSet::new();
        for edge in &self.edges {
            let label = format!(
                "edge {} -> {} (phase {})",
                edge.parent_object, edge.child_object, edge.phase_number
            );

            if !seen_edges.insert((edge.phase_number, &edge.parent_object, &edge.child_object)) {
                problems.push(format!("{}: declared more than once", label));
                continue;
            }

            let Some(phase) = self.phase(edge.phase_number) else {
                problems.push(format!("{}: phase is not declared", label));
                continue;
            };

            if !phase.contains(&edge.parent_object) {
                problems.push(format!("{}: parent is not an object of the phase", label));
            }
            if !phase.contains(&edge.child_object) {
                problems.push(format!("{}: child is not an object of the phase", label));
            }
            if !edge.child_key_uses_relationship() {
                problems.push(format!(
                    "{}: child key '{}' does not traverse relationship '{}'",
                    label,
                    edge.child_key_spec,
                    edge.relationship_name()
                ));
            }
        }

        for o in &self.match_overrides {
            if self
                .edge(o.phase_number, &o.parent_object, &o.child_object)
                .is_none()
            {
                problems.push(format!(
                    "match override {} -> {} (phase {}) has no matching edge",
                    o.parent_object, o.child_object, o.phase_number
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::Inconsistent { problems })
        }
    }
}
