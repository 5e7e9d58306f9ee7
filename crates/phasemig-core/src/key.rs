//! Natural-key specs and their rendering against raw records.
//!
//! A key spec is an ordered list of segments separated by `;`. Each segment is
//! either a direct field (`Index`) or a relationship traversal
//! (`Rule.Name`, `Rule.Product.ProductCode`). Rendering a composite spec joins
//! the non-empty segment values with `|`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::KeySpecError;

/// Separator between segments in the textual form of a key spec.
pub const SEGMENT_SEPARATOR: char = ';';

/// Separator between hops of a relationship traversal.
pub const HOP_SEPARATOR: char = '.';

/// Separator between segment values in a rendered composite key.
pub const COMPOSITE_SEPARATOR: &str = "|";

/// Field holding a record's internal (store-specific) identifier.
pub const ID_FIELD: &str = "Id";

/// A raw record as returned by the data-fetch collaborator.
///
/// Referenced records appear as nested objects under their relationship name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value. Returns `None` unless the value is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// Set a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Attach a referenced record under a relationship name.
    pub fn with_reference(mut self, relationship: impl Into<String>, record: Record) -> Self {
        self.0.insert(relationship.into(), Value::Object(record.0));
        self
    }

    /// The internal identifier, if present and non-empty.
    pub fn id(&self) -> Option<&str> {
        self.0
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Read a raw field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The referenced record under a relationship name, if present.
    pub fn reference(&self, relationship: &str) -> Option<&Map<String, Value>> {
        self.0.get(relationship).and_then(Value::as_object)
    }

    /// Borrow the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// One segment of a key spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySegment {
    /// A field read directly from the record.
    Field(String),
    /// A field read from a referenced record, following `relationships` in order.
    Path {
        /// Relationship hops, outermost first.
        relationships: Vec<String>,
        /// Field read on the last referenced record.
        field: String,
    },
}

impl KeySegment {
    /// The relationship this segment dereferences on the record itself.
    pub fn relationship(&self) -> Option<&str> {
        match self {
            KeySegment::Field(_) => None,
            KeySegment::Path { relationships, .. } => relationships.first().map(String::as_str),
        }
    }

    fn resolve<'a>(&self, fields: &'a Map<String, Value>) -> Option<&'a Value> {
        match self {
            KeySegment::Field(name) => fields.get(name),
            KeySegment::Path {
                relationships,
                field,
            } => {
                let mut current = fields;
                for hop in relationships {
                    current = current.get(hop)?.as_object()?;
                }
                current.get(field)
            }
        }
    }

    fn parse(text: &str) -> Result<Self, KeySpecError> {
        if !text.contains(HOP_SEPARATOR) {
            return Ok(KeySegment::Field(text.to_string()));
        }

        let mut parts: Vec<String> = text
            .split(HOP_SEPARATOR)
            .map(|p| p.trim().to_string())
            .collect();
        if parts.iter().any(String::is_empty) {
            return Err(KeySpecError::InvalidPath {
                segment: text.to_string(),
            });
        }

        // split always yields at least two parts here
        let field = parts.pop().unwrap_or_default();
        Ok(KeySegment::Path {
            relationships: parts,
            field,
        })
    }
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Field(name) => write!(f, "{}", name),
            KeySegment::Path {
                relationships,
                field,
            } => {
                for hop in relationships {
                    write!(f, "{}{}", hop, HOP_SEPARATOR)?;
                }
                write!(f, "{}", field)
            }
        }
    }
}

/// An ordered natural-key template.
///
/// Segment order is significant: it is the order values are joined when
/// rendering and the order relationship names are reported by
/// [`KeySpec::relationship_names`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeySpec {
    segments: Vec<KeySegment>,
}

impl KeySpec {
    /// Build a spec from segments.
    pub fn new(segments: Vec<KeySegment>) -> Result<Self, KeySpecError> {
        if segments.is_empty() {
            return Err(KeySpecError::Empty);
        }
        Ok(Self { segments })
    }

    /// A single direct-field spec.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            segments: vec![KeySegment::Field(name.into())],
        }
    }

    /// The segments in order.
    pub fn segments(&self) -> &[KeySegment] {
        &self.segments
    }

    /// Whether the spec has more than one segment.
    pub fn is_composite(&self) -> bool {
        self.segments.len() > 1
    }

    /// Render the key for a record.
    ///
    /// Unresolvable segments render as empty. A single direct-field spec falls
    /// back to the record's internal identifier when the field is missing.
    pub fn render(&self, record: &Record) -> String {
        render_fields(&self.segments, record.fields())
    }

    /// Render this spec against the record referenced through `relationship`.
    ///
    /// Used to compute a parent's key from a child record that carries its
    /// parent as a nested reference. Empty when the reference is absent.
    pub fn render_parent(&self, record: &Record, relationship: &str) -> String {
        record
            .reference(relationship)
            .map(|parent| render_fields(&self.segments, parent))
            .unwrap_or_default()
    }

    /// Relationship names dereferenced by the traversal segments, in segment order.
    ///
    /// Only the first hop of each traversal is reported; it is the only
    /// relationship read from the record itself.
    pub fn relationship_names(&self) -> Vec<&str> {
        self.segments.iter().filter_map(KeySegment::relationship).collect()
    }
}

fn render_fields(segments: &[KeySegment], fields: &Map<String, Value>) -> String {
    if let [only] = segments {
        let value = only.resolve(fields).map(scalar_text).unwrap_or_default();
        if value.is_empty() && matches!(only, KeySegment::Field(_)) {
            return fields.get(ID_FIELD).map(scalar_text).unwrap_or_default();
        }
        return value;
    }

    segments
        .iter()
        .filter_map(|segment| segment.resolve(fields))
        .map(scalar_text)
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join(COMPOSITE_SEPARATOR)
}

/// Text of a scalar JSON value; empty for null, arrays and objects.
pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 1e15) {
                format!("{}", f as i64)
            } else {
                n.to_string()
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

impl FromStr for KeySpec {
    type Err = KeySpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(KeySpecError::Empty);
        }

        let segments = s
            .split(SEGMENT_SEPARATOR)
            .enumerate()
            .map(|(index, raw)| {
                let raw = raw.trim();
                if raw.is_empty() {
                    Err(KeySpecError::EmptySegment {
                        spec: s.to_string(),
                        index,
                    })
                } else {
                    KeySegment::parse(raw)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { segments })
    }
}

impl TryFrom<String> for KeySpec {
    type Error = KeySpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeySpec> for String {
    fn from(spec: KeySpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEGMENT_SEPARATOR)?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

/// Relationship name used to traverse a lookup field.
///
/// `Foo__c` traverses through `Foo__r`, `AccountId` through `Account`; any
/// other field is its own relationship name.
pub fn relationship_name(field: &str) -> String {
    if let Some(stem) = field.strip_suffix("__c") {
        format!("{}__r", stem)
    } else if let Some(stem) = field.strip_suffix("Id").filter(|stem| !stem.is_empty()) {
        stem.to_string()
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule_condition() -> Record {
        Record::new()
            .with_field("Id", "a0C000000000001")
            .with_field("Index", 3)
            .with_reference("Rule", Record::new().with_field("Name", "Acme Rule"))
    }

    #[test]
    fn test_parse_composite_spec() {
        let spec: KeySpec = "Rule.Name;Index".parse().unwrap();

        assert!(spec.is_composite());
        assert_eq!(
            spec.segments(),
            &[
                KeySegment::Path {
                    relationships: vec!["Rule".to_string()],
                    field: "Name".to_string(),
                },
                KeySegment::Field("Index".to_string()),
            ]
        );
        assert_eq!(spec.to_string(), "Rule.Name;Index");
    }

    #[test]
    fn test_parse_rejects_malformed_specs() {
        assert_eq!("".parse::<KeySpec>(), Err(KeySpecError::Empty));
        assert!(matches!(
            "Name;;Index".parse::<KeySpec>(),
            Err(KeySpecError::EmptySegment { index: 1, .. })
        ));
        assert!(matches!(
            "Rule.;Index".parse::<KeySpec>(),
            Err(KeySpecError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_render_composite() {
        let spec: KeySpec = "Rule.Name;Index".parse().unwrap();
        assert_eq!(spec.render(&rule_condition()), "Acme Rule|3");
    }

    #[test]
    fn test_relationship_names_match_dereferenced_hops() {
        let spec: KeySpec = "Rule.Name;Index".parse().unwrap();
        assert_eq!(spec.relationship_names(), vec!["Rule"]);

        let nested: KeySpec = "ConfiguredSKU.ProductCode;OptionalSKU.Family.Name;Number"
            .parse()
            .unwrap();
        assert_eq!(
            nested.relationship_names(),
            vec!["ConfiguredSKU", "OptionalSKU"]
        );
    }

    #[test]
    fn test_missing_reference_renders_empty_segment() {
        let spec: KeySpec = "Rule.Name;Index".parse().unwrap();
        let orphan = Record::new().with_field("Id", "x").with_field("Index", 7);

        assert_eq!(spec.render(&orphan), "7");
    }

    #[test]
    fn test_single_field_falls_back_to_id() {
        let spec = KeySpec::field("Name");
        let record = Record::new().with_field("Id", "a01");
        assert_eq!(spec.render(&record), "a01");

        // traversal segments never fall back
        let path: KeySpec = "Rule.Name".parse().unwrap();
        assert_eq!(path.render(&record), "");
    }

    #[test]
    fn test_composite_never_falls_back_to_id() {
        let spec: KeySpec = "Name;Index".parse().unwrap();
        let record = Record::new().with_field("Id", "a01");
        assert_eq!(spec.render(&record), "");
    }

    #[test]
    fn test_render_parent_through_reference() {
        let spec = KeySpec::field("Name");
        assert_eq!(spec.render_parent(&rule_condition(), "Rule"), "Acme Rule");
        assert_eq!(spec.render_parent(&rule_condition(), "Missing"), "");
    }

    #[test]
    fn test_scalar_rendering() {
        assert_eq!(scalar_text(&json!(2.0)), "2");
        assert_eq!(scalar_text(&json!(2.5)), "2.5");
        assert_eq!(scalar_text(&json!(true)), "true");
        assert_eq!(scalar_text(&json!(null)), "");
        assert_eq!(scalar_text(&json!({"a": 1})), "");
    }

    #[test]
    fn test_relationship_name_for_field() {
        assert_eq!(relationship_name("SBQQ__Rule__c"), "SBQQ__Rule__r");
        assert_eq!(relationship_name("RuleId"), "Rule");
        assert_eq!(relationship_name("Id"), "Id");
        assert_eq!(relationship_name("Template"), "Template");
    }

    #[test]
    fn test_serde_uses_text_form() {
        let spec: KeySpec = "Schedule.Name;Name".parse().unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"Schedule.Name;Name\"");

        let back: KeySpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
        assert!(serde_json::from_str::<KeySpec>("\"\"").is_err());
    }
}
