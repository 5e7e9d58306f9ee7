//! DML operations and their inverses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A bulk data operation performed on one object during a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DmlOperation {
    /// Insert new records.
    #[serde(alias = "insert")]
    Insert,
    /// Update existing records by internal id.
    #[serde(alias = "update")]
    Update,
    /// Insert or update by external id.
    #[serde(alias = "upsert")]
    Upsert,
    /// Delete records.
    #[serde(alias = "delete")]
    Delete,
    /// Delete records and their hierarchy.
    #[serde(alias = "deleteHierarchy")]
    DeleteHierarchy,
    /// Delete records from the source store.
    #[serde(alias = "deleteSource")]
    DeleteSource,
}

/// Which snapshot a rollback needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotKind {
    /// Records as they were before the migration.
    PreMigration,
    /// Records as written, carrying newly assigned internal ids.
    PostMigration,
}

impl DmlOperation {
    /// Every operation, in declaration order.
    pub const ALL: [DmlOperation; 6] = [
        DmlOperation::Insert,
        DmlOperation::Update,
        DmlOperation::Upsert,
        DmlOperation::Delete,
        DmlOperation::DeleteHierarchy,
        DmlOperation::DeleteSource,
    ];

    /// The operation that undoes this one, if one exists.
    ///
    /// | Original | Rollback |
    /// |---|---|
    /// | Insert | Delete |
    /// | Update | Update |
    /// | Upsert | Update |
    /// | Delete | Insert |
    /// | DeleteHierarchy, DeleteSource | none |
    pub fn rollback_operation(self) -> Option<DmlOperation> {
        match self {
            DmlOperation::Insert => Some(DmlOperation::Delete),
            DmlOperation::Update | DmlOperation::Upsert => Some(DmlOperation::Update),
            DmlOperation::Delete => Some(DmlOperation::Insert),
            DmlOperation::DeleteHierarchy | DmlOperation::DeleteSource => None,
        }
    }

    /// The snapshot the rollback reads. `None` when there is no inverse.
    pub fn required_snapshot(self) -> Option<SnapshotKind> {
        match self {
            DmlOperation::Insert => Some(SnapshotKind::PostMigration),
            DmlOperation::Update | DmlOperation::Upsert | DmlOperation::Delete => {
                Some(SnapshotKind::PreMigration)
            }
            DmlOperation::DeleteHierarchy | DmlOperation::DeleteSource => None,
        }
    }
}

impl fmt::Display for DmlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmlOperation::Insert => write!(f, "Insert"),
            DmlOperation::Update => write!(f, "Update"),
            DmlOperation::Upsert => write!(f, "Upsert"),
            DmlOperation::Delete => write!(f, "Delete"),
            DmlOperation::DeleteHierarchy => write!(f, "DeleteHierarchy"),
            DmlOperation::DeleteSource => write!(f, "DeleteSource"),
        }
    }
}

impl FromStr for DmlOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "insert" => Ok(DmlOperation::Insert),
            "update" => Ok(DmlOperation::Update),
            "upsert" => Ok(DmlOperation::Upsert),
            "delete" => Ok(DmlOperation::Delete),
            "deletehierarchy" => Ok(DmlOperation::DeleteHierarchy),
            "deletesource" => Ok(DmlOperation::DeleteSource),
            _ => Err(format!("unknown operation '{}'", s)),
        }
    }
}
