//! Selection state and key matching.
//!
//! The [`SelectionStore`] records which master records an operator picked per
//! phase and which child records were bundled with them. [`MatchRule`] holds
//! the approximate key-matching rules used when a child has to be tied to a
//! parent from stored natural keys alone.

mod matcher;
mod store;

pub use matcher::{is_key_prefix, KeyMatcher, MatchRule, MATCH_RULESET_VERSION};
pub use store::{MergeOutcome, QueriedChildRecords, SelectedRecords, SelectionEntry, SelectionStore};
