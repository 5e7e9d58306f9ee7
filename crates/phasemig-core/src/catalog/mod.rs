//! Relationship catalog for phased migrations.
//!
//! The catalog declares the migration phases, the objects each phase covers,
//! and the parent → child edges used to bundle child records with the master
//! records an operator selects.

mod catalog;
mod phase;
mod relation;

pub use catalog::RelationshipCatalog;
pub use phase::{PhaseDefinition, PhaseEntry};
pub use relation::{MatchOverride, RelationshipEdge};
