//! Phase definitions.

use serde::{Deserialize, Serialize};

/// A phase as declared in the catalog.
///
/// `objects` are the master objects an operator selects records from;
/// `derived_objects` are bundled automatically through relationship edges.
/// Both lists are in migration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseEntry {
    /// Phase number (unique within a catalog).
    pub phase_number: u32,
    /// Human-readable summary.
    #[serde(default)]
    pub description: String,
    /// Selectable master objects.
    pub objects: Vec<String>,
    /// Child objects bundled with the masters.
    #[serde(default)]
    pub derived_objects: Vec<String>,
}

impl PhaseEntry {
    /// Create a phase with no objects.
    pub fn new(phase_number: u32, description: impl Into<String>) -> Self {
        Self {
            phase_number,
            description: description.into(),
            objects: Vec::new(),
            derived_objects: Vec::new(),
        }
    }

    /// Add a selectable master object.
    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.objects.push(object.into());
        self
    }

    /// Add a derived (child) object.
    pub fn with_derived_object(mut self, object: impl Into<String>) -> Self {
        self.derived_objects.push(object.into());
        self
    }

    /// Whether the object is a master or derived object of this phase.
    pub fn contains(&self, object: &str) -> bool {
        self.objects.iter().chain(&self.derived_objects).any(|o| o == object)
    }

    /// All objects, masters first. A derived object that is also a master is listed once.
    pub fn all_objects(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.objects.iter().map(String::as_str).collect();
        for derived in &self.derived_objects {
            if !all.contains(&derived.as_str()) {
                all.push(derived);
            }
        }
        all
    }

    /// The immutable definition handed to collaborators.
    pub fn definition(&self, include_derived: bool) -> PhaseDefinition {
        let objects = if include_derived {
            self.all_objects().into_iter().map(String::from).collect()
        } else {
            self.objects.clone()
        };

        PhaseDefinition {
            phase_number: self.phase_number,
            objects,
            description: self.description.clone(),
        }
    }
}

/// Phase definition as exchanged with collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDefinition {
    /// Phase number.
    pub phase_number: u32,
    /// Objects migrated in this phase.
    pub objects: Vec<String>,
    /// Human-readable summary.
    pub description: String,
}
