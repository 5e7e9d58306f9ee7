//! Per-phase selection state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::KeyMatcher;
use crate::key::{KeySpec, Record};

/// Cached child records: phase → parent object → parent external id → child
/// object → records.
pub type QueriedChildRecords =
    BTreeMap<u32, BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<Record>>>>>;

/// Selected records: phase → object → entries in selection order.
pub type SelectedRecords = BTreeMap<u32, BTreeMap<String, Vec<SelectionEntry>>>;

/// A selected record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionEntry {
    /// Rendered natural key.
    pub external_id: String,
    /// Internal identifier in the source store, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SelectionEntry {
    /// Create an entry with only a natural key.
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            id: None,
        }
    }

    /// Set the internal identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Entry for a raw record, keyed by `spec`.
    pub fn from_record(record: &Record, spec: &KeySpec) -> Self {
        Self {
            external_id: spec.render(record),
            id: record.id().map(String::from),
        }
    }

    /// Internal identifier when present, else the natural key.
    pub fn dedup_key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.external_id)
    }

    /// Whether two entries denote the same record.
    ///
    /// Internal identifiers decide when both sides carry one.
    pub fn same_record(&self, other: &SelectionEntry) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.external_id == other.external_id,
        }
    }
}

/// Where an incoming entry lands in a deduplicated list.
enum Placement {
    /// A stored entry already denotes the record.
    Duplicate(usize),
    /// A stored entry without an internal id has the same natural key and
    /// takes the incoming id.
    Upgrade(usize),
    /// The record is new.
    New,
}

/// Place `entry` among `entries`.
///
/// `entries` never holds an id-less entry whose natural key is shared with
/// another entry, so the final list is the same whatever order records
/// arrive in: one entry per distinct internal id, plus one per natural key
/// seen only without an id.
fn placement<'a>(
    entries: impl Iterator<Item = &'a SelectionEntry>,
    entry: &SelectionEntry,
) -> Placement {
    let mut upgrade = None;
    for (i, existing) in entries.enumerate() {
        match (&existing.id, &entry.id) {
            (Some(a), Some(b)) if a == b => return Placement::Duplicate(i),
            (Some(_), Some(_)) => {}
            (None, Some(_)) if existing.external_id == entry.external_id => {
                upgrade.get_or_insert(i);
            }
            (_, None) if existing.external_id == entry.external_id => {
                return Placement::Duplicate(i);
            }
            _ => {}
        }
    }
    upgrade.map_or(Placement::New, Placement::Upgrade)
}

/// Outcome of a [`SelectionStore::merge_children`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Entries newly selected.
    pub added: usize,
    /// Records already selected.
    pub duplicates: usize,
    /// Records whose key rendered empty.
    pub skipped: usize,
}

impl MergeOutcome {
    /// Fold another outcome into this one.
    pub fn absorb(&mut self, other: MergeOutcome) {
        self.added += other.added;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
    }
}

/// Master and child selections of one migration configuration.
///
/// Serialized as the `selectedMasterRecords` and `queriedChildRecords`
/// fields of the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionStore {
    #[serde(default)]
    selected_master_records: SelectedRecords,
    #[serde(default)]
    queried_child_records: QueriedChildRecords,
}

impl SelectionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from its persisted parts.
    pub fn from_parts(selected: SelectedRecords, queried: QueriedChildRecords) -> Self {
        Self {
            selected_master_records: selected,
            queried_child_records: queried,
        }
    }

    /// Split the store into its persisted parts.
    pub fn into_parts(self) -> (SelectedRecords, QueriedChildRecords) {
        (self.selected_master_records, self.queried_child_records)
    }

    /// Select a master record. Returns `false` if the natural key was already selected.
    ///
    /// A repeated natural key keeps its position; a differing internal
    /// identifier replaces the stored one.
    pub fn select_master(&mut self, phase: u32, object: &str, entry: SelectionEntry) -> bool {
        if entry.external_id.is_empty() {
            tracing::debug!(phase, object, "ignoring selection with empty external id");
            return false;
        }

        let entries = self
            .selected_master_records
            .entry(phase)
            .or_default()
            .entry(object.to_string())
            .or_default();

        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.external_id == entry.external_id)
        {
            if entry.id.is_some() && existing.id != entry.id {
                tracing::warn!(
                    phase,
                    object,
                    external_id = %entry.external_id,
                    previous = ?existing.id,
                    current = ?entry.id,
                    "duplicate external id, keeping latest internal id"
                );
                existing.id = entry.id;
            }
            return false;
        }

        entries.push(entry);
        true
    }

    /// Deselect a record by natural key.
    pub fn deselect_master(
        &mut self,
        phase: u32,
        object: &str,
        external_id: &str,
    ) -> Option<SelectionEntry> {
        let entries = self.selected_master_records.get_mut(&phase)?.get_mut(object)?;
        let position = entries.iter().position(|e| e.external_id == external_id)?;
        let removed = entries.remove(position);
        if entries.is_empty() {
            self.prune(phase, object);
        }
        Some(removed)
    }

    /// Remove every entry of an object matching the predicate. Returns the number removed.
    pub fn remove_where(
        &mut self,
        phase: u32,
        object: &str,
        mut predicate: impl FnMut(&SelectionEntry) -> bool,
    ) -> usize {
        let Some(entries) = self
            .selected_master_records
            .get_mut(&phase)
            .and_then(|objects| objects.get_mut(object))
        else {
            return 0;
        };

        let before = entries.len();
        entries.retain(|e| !predicate(e));
        let removed = before - entries.len();
        if entries.is_empty() {
            self.prune(phase, object);
        }
        removed
    }

    /// Merge fetched child records for one parent.
    ///
    /// Idempotent: the dedup key is the record's internal identifier when
    /// present, else its rendered key. A stored entry without an identifier
    /// adopts the one of a later record with the same key. Records whose key
    /// renders empty are skipped. The records are also cached under the parent.
    pub fn merge_children(
        &mut self,
        phase: u32,
        parent_object: &str,
        parent_external_id: &str,
        child_object: &str,
        records: &[Record],
        child_key_spec: &KeySpec,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        let cached = self
            .queried_child_records
            .entry(phase)
            .or_default()
            .entry(parent_object.to_string())
            .or_default()
            .entry(parent_external_id.to_string())
            .or_default()
            .entry(child_object.to_string())
            .or_default();

        let selected = self
            .selected_master_records
            .entry(phase)
            .or_default()
            .entry(child_object.to_string())
            .or_default();

        for record in records {
            let external_id = child_key_spec.render(record);
            if external_id.is_empty() {
                tracing::debug!(
                    phase,
                    child_object,
                    id = ?record.id(),
                    "skipping child record with empty external id"
                );
                outcome.skipped += 1;
                continue;
            }

            let entry = SelectionEntry {
                external_id,
                id: record.id().map(String::from),
            };

            let cached_entries: Vec<SelectionEntry> = cached
                .iter()
                .map(|r| SelectionEntry::from_record(r, child_key_spec))
                .collect();
            match placement(cached_entries.iter(), &entry) {
                Placement::Duplicate(_) => {}
                Placement::Upgrade(i) => cached[i] = record.clone(),
                Placement::New => cached.push(record.clone()),
            }

            match placement(selected.iter(), &entry) {
                Placement::Duplicate(_) => outcome.duplicates += 1,
                Placement::Upgrade(i) => {
                    selected[i].id = entry.id;
                    outcome.duplicates += 1;
                }
                Placement::New => {
                    selected.push(entry);
                    outcome.added += 1;
                }
            }
        }

        // an empty cache cell records "fetched, no children"; an empty selection does not
        if selected.is_empty() {
            self.prune(phase, child_object);
        }
        outcome
    }

    /// Drop the cached children of one parent. Returns them per child object.
    pub fn forget_children(
        &mut self,
        phase: u32,
        parent_object: &str,
        parent_external_id: &str,
    ) -> BTreeMap<String, Vec<Record>> {
        let Some(parents) = self
            .queried_child_records
            .get_mut(&phase)
            .and_then(|objects| objects.get_mut(parent_object))
        else {
            return BTreeMap::new();
        };

        let removed = parents.remove(parent_external_id).unwrap_or_default();
        if parents.is_empty() {
            if let Some(objects) = self.queried_child_records.get_mut(&phase) {
                objects.remove(parent_object);
                if objects.is_empty() {
                    self.queried_child_records.remove(&phase);
                }
            }
        }
        removed
    }

    /// Drop a child record from every cached cell of its object.
    ///
    /// Returns the number of cached records removed. Emptied cells stay and
    /// still record that the parent was fetched.
    pub fn forget_child(
        &mut self,
        phase: u32,
        child_object: &str,
        entry: &SelectionEntry,
        child_key_spec: &KeySpec,
    ) -> usize {
        let Some(objects) = self.queried_child_records.get_mut(&phase) else {
            return 0;
        };

        let mut removed = 0;
        for children in objects.values_mut().flat_map(|parents| parents.values_mut()) {
            if let Some(records) = children.get_mut(child_object) {
                let before = records.len();
                records.retain(|r| {
                    !SelectionEntry::from_record(r, child_key_spec).same_record(entry)
                });
                removed += before - records.len();
            }
        }
        removed
    }

    /// Whether any cached parent cell still holds a record equal to `entry`.
    pub fn is_cached_child(
        &self,
        phase: u32,
        child_object: &str,
        entry: &SelectionEntry,
        child_key_spec: &KeySpec,
    ) -> bool {
        self.queried_child_records
            .get(&phase)
            .into_iter()
            .flat_map(|objects| objects.values())
            .flat_map(|parents| parents.values())
            .filter_map(|children| children.get(child_object))
            .flatten()
            .any(|r| SelectionEntry::from_record(r, child_key_spec).same_record(entry))
    }

    /// Entries selected for an object.
    pub fn selected(&self, phase: u32, object: &str) -> &[SelectionEntry] {
        self.selected_master_records
            .get(&phase)
            .and_then(|objects| objects.get(object))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Natural keys selected for an object, in selection order.
    pub fn selected_external_ids(&self, phase: u32, object: &str) -> Vec<&str> {
        self.selected(phase, object)
            .iter()
            .map(|e| e.external_id.as_str())
            .collect()
    }

    /// Objects with at least one selection in the phase.
    pub fn selected_objects(&self, phase: u32) -> Vec<&str> {
        self.selected_master_records
            .get(&phase)
            .map(|objects| objects.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Total number of selected records in a phase.
    pub fn selected_count(&self, phase: u32) -> usize {
        self.selected_master_records
            .get(&phase)
            .map(|objects| objects.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Number of selected records of one object in a phase.
    pub fn selected_count_for(&self, phase: u32, object: &str) -> usize {
        self.selected(phase, object).len()
    }

    /// Cached child records of one parent and child object.
    pub fn queried_children(
        &self,
        phase: u32,
        parent_object: &str,
        parent_external_id: &str,
        child_object: &str,
    ) -> &[Record] {
        self.queried_child_records
            .get(&phase)
            .and_then(|objects| objects.get(parent_object))
            .and_then(|parents| parents.get(parent_external_id))
            .and_then(|children| children.get(child_object))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of cached children of one parent across child objects.
    pub fn child_count(&self, phase: u32, parent_object: &str, parent_external_id: &str) -> usize {
        self.queried_child_records
            .get(&phase)
            .and_then(|objects| objects.get(parent_object))
            .and_then(|parents| parents.get(parent_external_id))
            .map(|children| children.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Whether the phase has any cached child records.
    pub fn has_queried_children(&self, phase: u32) -> bool {
        self.queried_child_records
            .get(&phase)
            .is_some_and(|objects| !objects.is_empty())
    }

    /// Cached cells of a phase as `(parent object, parent external id, child object, records)`.
    pub fn queried_cells(&self, phase: u32) -> Vec<(&str, &str, &str, &[Record])> {
        let mut cells = Vec::new();
        if let Some(objects) = self.queried_child_records.get(&phase) {
            for (parent_object, parents) in objects {
                for (parent_id, children) in parents {
                    for (child_object, records) in children {
                        cells.push((
                            parent_object.as_str(),
                            parent_id.as_str(),
                            child_object.as_str(),
                            records.as_slice(),
                        ));
                    }
                }
            }
        }
        cells
    }

    /// Stored child selections associated with a parent key by the matcher.
    pub fn children_matching(
        &self,
        phase: u32,
        child_object: &str,
        parent_key: &str,
        matcher: &dyn KeyMatcher,
    ) -> Vec<&SelectionEntry> {
        self.selected(phase, child_object)
            .iter()
            .filter(|e| matcher.matches(parent_key, &e.external_id))
            .collect()
    }

    /// Remove all selections and cached children of a phase.
    pub fn clear_phase(&mut self, phase: u32) {
        self.selected_master_records.remove(&phase);
        self.queried_child_records.remove(&phase);
    }

    fn prune(&mut self, phase: u32, object: &str) {
        if let Some(objects) = self.selected_master_records.get_mut(&phase) {
            objects.remove(object);
            if objects.is_empty() {
                self.selected_master_records.remove(&phase);
            }
        }
    }
}
