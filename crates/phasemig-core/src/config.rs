//! Migration configuration documents.
//!
//! A [`MigrationConfig`] is the persisted state of one migration: the two
//! store connections, the per-phase selections and child cache, and the
//! per-phase settings the external engine reads from a [`PhasePlan`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backup::DmlOperation;
use crate::catalog::RelationshipCatalog;
use crate::error::ConfigError;
use crate::key::{KeySpec, Record};
use crate::selection::{
    MergeOutcome, QueriedChildRecords, SelectedRecords, SelectionEntry, SelectionStore,
};

/// Operation used for a phase with no explicit setting.
pub const DEFAULT_OPERATION: DmlOperation = DmlOperation::Upsert;

/// A named migration configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConfigDocument", into = "ConfigDocument")]
pub struct MigrationConfig {
    /// Configuration name, unique within a store.
    pub name: String,
    /// Alias of the source connection.
    pub source_org: Option<String>,
    /// Alias of the target connection.
    pub target_org: Option<String>,
    /// Selected records and cached children.
    pub selection: SelectionStore,
    /// Phases the engine reported as migrated.
    pub completed_phases: Vec<u32>,
    /// Objects the operator left out of a phase.
    pub excluded_objects_by_phase: BTreeMap<u32, Vec<String>>,
    /// Operation per phase.
    pub phase_operations: BTreeMap<u32, DmlOperation>,
}

impl MigrationConfig {
    /// Create an empty configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the source connection.
    pub fn with_source_org(mut self, alias: impl Into<String>) -> Self {
        self.source_org = Some(alias.into());
        self
    }

    /// Set the target connection.
    pub fn with_target_org(mut self, alias: impl Into<String>) -> Self {
        self.target_org = Some(alias.into());
        self
    }

    /// Set the operation for a phase.
    pub fn with_phase_operation(mut self, phase: u32, operation: DmlOperation) -> Self {
        self.phase_operations.insert(phase, operation);
        self
    }

    /// Check that a phase can be worked on with this configuration.
    ///
    /// Runs before any request leaves the core.
    pub fn validate_for_phase(
        &self,
        catalog: &RelationshipCatalog,
        phase: u32,
    ) -> Result<(), ConfigError> {
        if self.source_org.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingSourceOrg(self.name.clone()));
        }
        if self.target_org.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingTargetOrg(self.name.clone()));
        }
        if catalog.phase(phase).is_none() {
            return Err(ConfigError::UnknownPhase(phase));
        }
        if self.phase_objects(catalog, phase).is_empty() {
            return Err(ConfigError::NoPhaseObjects(phase));
        }
        Ok(())
    }

    /// Objects of a phase in migration order, minus exclusions.
    pub fn phase_objects<'a>(&self, catalog: &'a RelationshipCatalog, phase: u32) -> Vec<&'a str> {
        catalog
            .phase(phase)
            .map(|p| {
                p.all_objects()
                    .into_iter()
                    .filter(|o| !self.is_excluded(phase, o))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether an object is excluded from a phase.
    pub fn is_excluded(&self, phase: u32, object: &str) -> bool {
        self.excluded_objects_by_phase
            .get(&phase)
            .is_some_and(|objects| objects.iter().any(|o| o == object))
    }

    /// Exclude an object from a phase.
    pub fn exclude_object(&mut self, phase: u32, object: impl Into<String>) {
        let object = object.into();
        let excluded = self.excluded_objects_by_phase.entry(phase).or_default();
        if !excluded.contains(&object) {
            excluded.push(object);
        }
    }

    /// Undo an exclusion.
    pub fn include_object(&mut self, phase: u32, object: &str) {
        if let Some(excluded) = self.excluded_objects_by_phase.get_mut(&phase) {
            excluded.retain(|o| o != object);
            if excluded.is_empty() {
                self.excluded_objects_by_phase.remove(&phase);
            }
        }
    }

    /// Operation for a phase, [`DEFAULT_OPERATION`] when unset.
    pub fn operation_for_phase(&self, phase: u32) -> DmlOperation {
        self.phase_operations
            .get(&phase)
            .copied()
            .unwrap_or(DEFAULT_OPERATION)
    }

    /// Record a phase as migrated.
    pub fn mark_phase_completed(&mut self, phase: u32) {
        if !self.completed_phases.contains(&phase) {
            self.completed_phases.push(phase);
            self.completed_phases.sort_unstable();
        }
    }

    /// Whether a phase was migrated.
    pub fn is_phase_completed(&self, phase: u32) -> bool {
        self.completed_phases.contains(&phase)
    }

    /// Select a record of an object belonging to the phase.
    ///
    /// Derived objects are accepted too; manual child selections merge with
    /// fetched ones.
    pub fn select(
        &mut self,
        catalog: &RelationshipCatalog,
        phase: u32,
        object: &str,
        entry: SelectionEntry,
    ) -> Result<bool, ConfigError> {
        let phase_entry = catalog.phase(phase).ok_or(ConfigError::UnknownPhase(phase))?;
        if !phase_entry.contains(object) {
            return Err(ConfigError::UnknownObject {
                phase,
                object: object.to_string(),
            });
        }
        Ok(self.selection.select_master(phase, object, entry))
    }

    /// Deselect a record and the children bundled with it.
    ///
    /// A deselected child record is also dropped from the cached parent
    /// cells so that replaying the cache cannot select it again.
    ///
    /// Children fetched for the record are removed unless another cached
    /// parent still holds them. When nothing was fetched, stored child
    /// selections associated by the catalog's match rule are removed instead.
    pub fn deselect(
        &mut self,
        catalog: &RelationshipCatalog,
        phase: u32,
        object: &str,
        external_id: &str,
    ) -> Option<SelectionEntry> {
        let removed = self.selection.deselect_master(phase, object, external_id)?;
        for edge in catalog.edges_for_child(phase, object) {
            self.selection
                .forget_child(phase, object, &removed, &edge.child_key_spec);
        }
        let mut forgotten = self.selection.forget_children(phase, object, external_id);

        for edge in catalog.edges_for_parent(phase, object) {
            let child = edge.child_object.as_str();
            let candidates: Vec<SelectionEntry> = match forgotten.remove(child) {
                Some(records) => records
                    .iter()
                    .map(|r| SelectionEntry::from_record(r, &edge.child_key_spec))
                    .collect(),
                None => {
                    let rule = catalog.match_rule(phase, object, child);
                    self.selection
                        .children_matching(phase, child, external_id, &rule)
                        .into_iter()
                        .cloned()
                        .collect()
                }
            };

            let orphaned: Vec<SelectionEntry> = candidates
                .into_iter()
                .filter(|e| {
                    !self
                        .selection
                        .is_cached_child(phase, child, e, &edge.child_key_spec)
                })
                .collect();

            let dropped = self
                .selection
                .remove_where(phase, child, |s| orphaned.iter().any(|o| o.same_record(s)));
            if dropped > 0 {
                tracing::debug!(
                    phase,
                    parent = object,
                    child,
                    dropped,
                    "cascaded deselection"
                );
            }
        }

        Some(removed)
    }

    /// Re-merge the cached children of a phase into its selections.
    ///
    /// Cells whose parent and child the catalog does not relate are skipped.
    pub fn remerge_cached_children(
        &mut self,
        catalog: &RelationshipCatalog,
        phase: u32,
    ) -> MergeOutcome {
        let cells: Vec<(String, String, String, Vec<Record>)> = self
            .selection
            .queried_cells(phase)
            .into_iter()
            .map(|(parent, parent_id, child, records)| {
                (
                    parent.to_string(),
                    parent_id.to_string(),
                    child.to_string(),
                    records.to_vec(),
                )
            })
            .collect();

        let mut outcome = MergeOutcome::default();
        for (parent_object, parent_id, child_object, records) in cells {
            let Some(edge) = catalog.edge(phase, &parent_object, &child_object) else {
                tracing::debug!(
                    phase,
                    parent = %parent_object,
                    child = %child_object,
                    "cached cell has no relationship"
                );
                continue;
            };
            outcome.absorb(self.selection.merge_children(
                phase,
                &parent_object,
                &parent_id,
                &child_object,
                &records,
                &edge.child_key_spec,
            ));
        }
        outcome
    }

    /// The document the external engine consumes for one phase.
    pub fn phase_plan(
        &self,
        catalog: &RelationshipCatalog,
        phase: u32,
    ) -> Result<PhasePlan, ConfigError> {
        self.validate_for_phase(catalog, phase)?;

        let objects = self
            .phase_objects(catalog, phase)
            .into_iter()
            .filter_map(|object| {
                let records = self.selection.selected(phase, object);
                if records.is_empty() {
                    return None;
                }
                Some(PlannedObject {
                    object_name: object.to_string(),
                    external_id: external_id_spec(catalog, phase, object),
                    records: records.to_vec(),
                })
            })
            .collect();

        Ok(PhasePlan {
            phase_number: phase,
            source_org: self.source_org.clone().unwrap_or_default(),
            target_org: self.target_org.clone().unwrap_or_default(),
            operation: self.operation_for_phase(phase),
            objects,
        })
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a configuration document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Natural key of an object in a phase: its child key when it is a child,
/// otherwise its parent key.
fn external_id_spec(catalog: &RelationshipCatalog, phase: u32, object: &str) -> Option<KeySpec> {
    catalog
        .edges_for_child(phase, object)
        .first()
        .map(|e| e.child_key_spec.clone())
        .or_else(|| {
            catalog
                .edges_for_parent(phase, object)
                .first()
                .map(|e| e.parent_key_spec.clone())
        })
}

/// One object of a [`PhasePlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedObject {
    /// Object name.
    pub object_name: String,
    /// Natural key spec, when the catalog relates the object.
    pub external_id: Option<KeySpec>,
    /// Selected records.
    pub records: Vec<SelectionEntry>,
}

/// Selected records of one phase, in migration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhasePlan {
    /// Phase number.
    pub phase_number: u32,
    /// Source connection.
    pub source_org: String,
    /// Target connection.
    pub target_org: String,
    /// Operation for every object.
    pub operation: DmlOperation,
    /// Objects with at least one selected record.
    pub objects: Vec<PlannedObject>,
}

impl PhasePlan {
    /// Total records in the plan.
    pub fn record_count(&self) -> usize {
        self.objects.iter().map(|o| o.records.len()).sum()
    }
}

/// On-disk shape of a configuration.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDocument {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_org: Option<String>,
    #[serde(default)]
    selected_master_records: SelectedRecords,
    #[serde(default)]
    queried_child_records: QueriedChildRecords,
    #[serde(default)]
    completed_phases: Vec<u32>,
    #[serde(default)]
    excluded_objects_by_phase: BTreeMap<u32, Vec<String>>,
    #[serde(default)]
    phase_operations: BTreeMap<u32, DmlOperation>,
}

impl From<ConfigDocument> for MigrationConfig {
    fn from(doc: ConfigDocument) -> Self {
        Self {
            name: doc.name,
            source_org: doc.source_org,
            target_org: doc.target_org,
            selection: SelectionStore::from_parts(
                doc.selected_master_records,
                doc.queried_child_records,
            ),
            completed_phases: doc.completed_phases,
            excluded_objects_by_phase: doc.excluded_objects_by_phase,
            phase_operations: doc.phase_operations,
        }
    }
}

impl From<MigrationConfig> for ConfigDocument {
    fn from(config: MigrationConfig) -> Self {
        let (selected_master_records, queried_child_records) = config.selection.into_parts();
        Self {
            name: config.name,
            source_org: config.source_org,
            target_org: config.target_org,
            selected_master_records,
            queried_child_records,
            completed_phases: config.completed_phases,
            excluded_objects_by_phase: config.excluded_objects_by_phase,
            phase_operations: config.phase_operations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> RelationshipCatalog {
        RelationshipCatalog::builtin().unwrap()
    }

    fn config() -> MigrationConfig {
        MigrationConfig::new("spring-release")
            .with_source_org("dev")
            .with_target_org("uat")
    }

    fn condition(id: &str, rule: &str, index: i64) -> Record {
        Record::new()
            .with_field("Id", id)
            .with_field("Index", index)
            .with_reference("Rule", Record::new().with_field("Name", rule))
    }

    #[test]
    fn test_validate_for_phase() {
        let catalog = catalog();

        assert_eq!(
            MigrationConfig::new("x").validate_for_phase(&catalog, 2),
            Err(ConfigError::MissingSourceOrg("x".to_string()))
        );
        assert_eq!(
            MigrationConfig::new("x").with_source_org("dev").validate_for_phase(&catalog, 2),
            Err(ConfigError::MissingTargetOrg("x".to_string()))
        );
        assert_eq!(
            config().validate_for_phase(&catalog, 42),
            Err(ConfigError::UnknownPhase(42))
        );
        assert_eq!(config().validate_for_phase(&catalog, 2), Ok(()));
    }

    #[test]
    fn test_exclusions() {
        let catalog = catalog();
        let mut config = config();

        for object in catalog.phase(6).unwrap().all_objects() {
            config.exclude_object(6, object);
        }
        assert_eq!(
            config.validate_for_phase(&catalog, 6),
            Err(ConfigError::NoPhaseObjects(6))
        );

        config.include_object(6, "ApprovalRule");
        assert_eq!(config.phase_objects(&catalog, 6), vec!["ApprovalRule"]);
        assert!(config.validate_for_phase(&catalog, 6).is_ok());
    }

    #[test]
    fn test_operation_and_completion() {
        let mut config = config().with_phase_operation(3, DmlOperation::Insert);

        assert_eq!(config.operation_for_phase(3), DmlOperation::Insert);
        assert_eq!(config.operation_for_phase(2), DmlOperation::Upsert);

        config.mark_phase_completed(2);
        config.mark_phase_completed(1);
        config.mark_phase_completed(2);
        assert_eq!(config.completed_phases, vec![1, 2]);
        assert!(config.is_phase_completed(1));
    }

    #[test]
    fn test_select_rejects_foreign_object() {
        let catalog = catalog();
        let mut config = config();

        let err = config
            .select(&catalog, 2, "PriceRule", SelectionEntry::new("Volume"))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownObject {
                phase: 2,
                object: "PriceRule".to_string()
            }
        );
        assert!(config
            .select(&catalog, 2, "ErrorCondition", SelectionEntry::new("Manual|1"))
            .unwrap());
    }

    #[test]
    fn test_deselect_cascades_to_fetched_children() {
        let catalog = catalog();
        let spec: KeySpec = "Rule.Name;Index".parse().unwrap();
        let mut config = config();

        config
            .select(
                &catalog,
                2,
                "ProductRule",
                SelectionEntry::new("Discount Rule"),
            )
            .unwrap();
        config
            .select(
                &catalog,
                2,
                "ProductRule",
                SelectionEntry::new("Bundle Rule"),
            )
            .unwrap();
        config.selection.merge_children(
            2,
            "ProductRule",
            "Discount Rule",
            "ErrorCondition",
            &[condition("c1", "Discount Rule", 0)],
            &spec,
        );
        config.selection.merge_children(
            2,
            "ProductRule",
            "Bundle Rule",
            "ErrorCondition",
            &[condition("c2", "Bundle Rule", 0)],
            &spec,
        );

        let removed = config.deselect(&catalog, 2, "ProductRule", "Discount Rule");

        assert_eq!(removed, Some(SelectionEntry::new("Discount Rule")));
        assert_eq!(
            config.selection.selected_external_ids(2, "ErrorCondition"),
            vec!["Bundle Rule|0"]
        );
    }

    #[test]
    fn test_deselected_child_stays_out_after_cache_reload() {
        let catalog = catalog();
        let spec: KeySpec = "Rule.Name;Index".parse().unwrap();
        let mut config = config();

        config
            .select(&catalog, 2, "ProductRule", SelectionEntry::new("R"))
            .unwrap();
        config.selection.merge_children(
            2,
            "ProductRule",
            "R",
            "ErrorCondition",
            &[condition("c1", "R", 0), condition("c2", "R", 1)],
            &spec,
        );
        assert!(config
            .deselect(&catalog, 2, "ErrorCondition", "R|0")
            .is_some());

        let outcome = config.remerge_cached_children(&catalog, 2);

        assert_eq!(outcome.added, 0);
        assert_eq!(
            config.selection.selected_external_ids(2, "ErrorCondition"),
            vec!["R|1"]
        );
        assert_eq!(config.selection.child_count(2, "ProductRule", "R"), 1);
    }

    #[test]
    fn test_remerge_cached_children() {
        let catalog = catalog();
        let spec: KeySpec = "Rule.Name;Index".parse().unwrap();
        let mut config = config();

        config.selection.merge_children(
            2,
            "ProductRule",
            "R",
            "ErrorCondition",
            &[condition("c1", "R", 0)],
            &spec,
        );
        config.selection.merge_children(
            2,
            "ProductRule",
            "R",
            "UnrelatedObject",
            &[condition("u1", "R", 0)],
            &spec,
        );
        config.selection.remove_where(2, "ErrorCondition", |_| true);
        config.selection.remove_where(2, "UnrelatedObject", |_| true);

        let outcome = config.remerge_cached_children(&catalog, 2);

        assert_eq!(outcome.added, 1);
        assert_eq!(
            config.selection.selected_external_ids(2, "ErrorCondition"),
            vec!["R|0"]
        );
        assert_eq!(config.selection.selected_count_for(2, "UnrelatedObject"), 0);
        assert_eq!(config.remerge_cached_children(&catalog, 2).added, 0);
    }

    #[test]
    fn test_deselect_without_cache_uses_match_rule() {
        let catalog = catalog();
        let mut config = config();

        config
            .select(&catalog, 2, "ProductRule", SelectionEntry::new("Acme"))
            .unwrap();
        config
            .select(
                &catalog,
                2,
                "LookupQuery",
                SelectionEntry::new("Acme|Region"),
            )
            .unwrap();
        config
            .select(&catalog, 2, "LookupQuery", SelectionEntry::new("Acme Subsidiary|Tier"))
            .unwrap();
        config
            .select(&catalog, 2, "ProductAction", SelectionEntry::new("Acme Subsidiary|1"))
            .unwrap();

        config.deselect(&catalog, 2, "ProductRule", "Acme");

        // exact rule for LookupQuery, generic for ProductAction
        assert_eq!(
            config.selection.selected_external_ids(2, "LookupQuery"),
            vec!["Acme Subsidiary|Tier"]
        );
        assert_eq!(config.selection.selected_count_for(2, "ProductAction"), 0);
    }

    #[test]
    fn test_phase_plan() {
        let catalog = catalog();
        let mut config = config();
        config
            .select(
                &catalog,
                2,
                "ProductRule",
                SelectionEntry::new("Discount Rule"),
            )
            .unwrap();
        config.selection.merge_children(
            2,
            "ProductRule",
            "Discount Rule",
            "ErrorCondition",
            &[condition("c1", "Discount Rule", 0)],
            &"Rule.Name;Index".parse().unwrap(),
        );

        let plan = config.phase_plan(&catalog, 2).unwrap();

        assert_eq!(plan.operation, DmlOperation::Upsert);
        assert_eq!(plan.record_count(), 2);
        let names: Vec<_> = plan.objects.iter().map(|o| o.object_name.as_str()).collect();
        assert_eq!(names, vec!["ProductRule", "ErrorCondition"]);
        assert_eq!(plan.objects[0].external_id, Some(KeySpec::field("Name")));
        assert_eq!(
            plan.objects[1].external_id.as_ref().map(ToString::to_string),
            Some("Rule.Name;Index".to_string())
        );
    }

    #[test]
    fn test_document_round_trip() {
        let catalog = catalog();
        let mut config = config().with_phase_operation(2, DmlOperation::Insert);
        config.exclude_object(2, "LookupQuery");
        config.mark_phase_completed(1);
        config
            .select(
                &catalog,
                2,
                "ProductRule",
                SelectionEntry::new("R").with_id("a1"),
            )
            .unwrap();
        config.selection.merge_children(
            2,
            "ProductRule",
            "R",
            "ErrorCondition",
            &[condition("c1", "R", 0)],
            &"Rule.Name;Index".parse().unwrap(),
        );

        let json = config.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["sourceOrg"], "dev");
        assert_eq!(
            value["selectedMasterRecords"]["2"]["ProductRule"][0]["externalId"],
            "R"
        );
        assert_eq!(
            value["queriedChildRecords"]["2"]["ProductRule"]["R"]["ErrorCondition"][0]["Id"],
            "c1"
        );
        assert_eq!(value["phaseOperations"]["2"], "Insert");

        assert_eq!(MigrationConfig::from_json(&json).unwrap(), config);
    }
}
