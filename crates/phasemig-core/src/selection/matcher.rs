//! Heuristic association of child keys with parent keys.
//!
//! Used only when a child cannot be tied to its parent through a fetched
//! reference and must be associated from stored natural-key strings. The
//! generic rule is approximate: substring containment over-matches short or
//! overlapping keys. Pairs where that is known to bite use [`MatchRule::Exact`].

use serde::{Deserialize, Serialize};

use crate::key::COMPOSITE_SEPARATOR;

/// Version of the rule set implemented by [`MatchRule`].
pub const MATCH_RULESET_VERSION: u32 = 1;

/// Decides whether a candidate child key belongs to a parent key.
pub trait KeyMatcher {
    /// Whether `candidate_key` is associated with `parent_key`.
    fn matches(&self, parent_key: &str, candidate_key: &str) -> bool;
}

/// Built-in matching rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchRule {
    /// Equality, containment either way, or equal leading segment of two composites.
    #[default]
    Generic,
    /// Equality, or equal leading segment; never substring containment.
    Exact,
}

impl KeyMatcher for MatchRule {
    fn matches(&self, parent_key: &str, candidate_key: &str) -> bool {
        let parent = normalize(parent_key);
        let candidate = normalize(candidate_key);
        if parent.is_empty() || candidate.is_empty() {
            return false;
        }
        if parent == candidate {
            return true;
        }

        let both_composite = is_composite(&parent) && is_composite(&candidate);
        let same_lead = first_segment(&parent) == first_segment(&candidate);

        match self {
            MatchRule::Generic => {
                parent.contains(&candidate)
                    || candidate.contains(&parent)
                    || (both_composite && same_lead)
            }
            MatchRule::Exact => {
                (both_composite && same_lead)
                    || (is_composite(&candidate) && first_segment(&candidate) == parent)
            }
        }
    }
}

impl std::fmt::Display for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchRule::Generic => write!(f, "generic"),
            MatchRule::Exact => write!(f, "exact"),
        }
    }
}

/// Whether `candidate_key` is `parent_key` itself or a composite led by it.
///
/// Compared after normalization. Unlike [`MatchRule::Generic`] this never
/// accepts a parent that is only a substring of the leading segment.
pub fn is_key_prefix(parent_key: &str, candidate_key: &str) -> bool {
    let parent = normalize(parent_key);
    let candidate = normalize(candidate_key);
    if parent.is_empty() {
        return false;
    }
    candidate
        .strip_prefix(parent.as_str())
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(COMPOSITE_SEPARATOR))
}

/// Strip all whitespace and lower-case.
fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_composite(key: &str) -> bool {
    key.contains(COMPOSITE_SEPARATOR)
}

fn first_segment(key: &str) -> &str {
    key.split(COMPOSITE_SEPARATOR).next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_prefix_matches_both_rules() {
        for rule in [MatchRule::Generic, MatchRule::Exact] {
            assert!(rule.matches("PB|Widget|1", "PB|Widget|1|Tier A"), "{}", rule);
        }
    }

    #[test]
    fn test_short_key_overmatch_only_generic() {
        assert!(MatchRule::Generic.matches("Acme", "Acme Subsidiary"));
        assert!(!MatchRule::Exact.matches("Acme", "Acme Subsidiary"));
    }

    #[test]
    fn test_normalization() {
        assert!(MatchRule::Exact.matches("Discount Rule", "discountrule"));
        assert!(MatchRule::Generic.matches(" Discount\tRule ", "DISCOUNT RULE"));
    }

    #[test]
    fn test_exact_accepts_parent_as_leading_segment() {
        assert!(MatchRule::Exact.matches("Discount Rule", "Discount Rule|0"));
        assert!(!MatchRule::Exact.matches("Discount", "Discount Rule|0"));
        assert!(MatchRule::Generic.matches("Discount", "Discount Rule|0"));
    }

    #[test]
    fn test_composites_with_same_lead() {
        assert!(MatchRule::Generic.matches("Std|Widget", "Std|Gadget"));
        assert!(MatchRule::Exact.matches("Std|Widget", "Std|Gadget"));
        assert!(!MatchRule::Exact.matches("Std|Widget", "Other|Widget"));
    }

    #[test]
    fn test_empty_keys_never_match() {
        assert!(!MatchRule::Generic.matches("", "Acme"));
        assert!(!MatchRule::Generic.matches("Acme", "   "));
    }

    #[test]
    fn test_key_prefix() {
        assert!(is_key_prefix("Acme Subsidiary", "Acme Subsidiary|1"));
        assert!(is_key_prefix("acme", " ACME "));
        assert!(is_key_prefix("Std|Widget", "Std|Widget|Tier A"));
        assert!(!is_key_prefix("Acme", "Acme Subsidiary|1"));
        assert!(!is_key_prefix("", "Acme|1"));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&MatchRule::Exact).unwrap(),
            "\"exact\""
        );
        let rule: MatchRule = serde_json::from_str("\"generic\"").unwrap();
        assert_eq!(rule, MatchRule::Generic);
    }
}
