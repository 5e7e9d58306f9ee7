//! Rollback planning.
//!
//! The planner maps every migrated object of a backup to the operation that
//! undoes it. It never executes anything and never fails: objects without an
//! inverse, or whose snapshot is missing, are reported in the plan.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BackupMetadata, BackupObject, DmlOperation, SnapshotKind};
use crate::error::BackupError;

/// Whether an object can be rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RollbackStatus {
    /// Inverse exists and its snapshot is recorded.
    Ready,
    /// Inverse exists but the snapshot is missing; rollback may be incomplete.
    MissingBackup,
    /// The original operation has no safe inverse.
    NoInverse,
}

impl std::fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackStatus::Ready => write!(f, "ready"),
            RollbackStatus::MissingBackup => write!(f, "missing backup"),
            RollbackStatus::NoInverse => write!(f, "cannot rollback"),
        }
    }
}

/// One object of a rollback plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackObject {
    /// Object name.
    pub object_name: String,
    /// Operation performed during the migration.
    pub original_operation: DmlOperation,
    /// Operation that undoes it.
    pub rollback_operation: Option<DmlOperation>,
    /// External-id spec used by the migration.
    pub external_id: String,
    /// Snapshot the rollback reads.
    pub backup_file: Option<PathBuf>,
    /// Plan status.
    pub status: RollbackStatus,
}

impl RollbackObject {
    /// User-facing warning for anything but [`RollbackStatus::Ready`].
    pub fn warning(&self) -> Option<String> {
        match self.status {
            RollbackStatus::Ready => None,
            RollbackStatus::MissingBackup => Some(format!(
                "{}: missing backup, rollback may be incomplete",
                self.object_name
            )),
            RollbackStatus::NoInverse => Some(format!(
                "{}: cannot rollback {}",
                self.object_name, self.original_operation
            )),
        }
    }
}

/// A computed rollback plan, objects in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPlan {
    /// Timestamp of the backup the plan undoes.
    pub backup_timestamp: DateTime<Utc>,
    /// Phase of the backup, if recorded.
    pub phase_number: Option<u32>,
    /// Objects, last migrated first.
    pub objects: Vec<RollbackObject>,
}

impl RollbackPlan {
    /// Whether every object can be rolled back from a recorded snapshot.
    pub fn is_complete(&self) -> bool {
        self.objects.iter().all(|o| o.status == RollbackStatus::Ready)
    }

    /// Warnings for every object that is not ready.
    pub fn warnings(&self) -> Vec<String> {
        self.objects.iter().filter_map(RollbackObject::warning).collect()
    }

    /// Objects that have an inverse operation, including those missing a backup.
    pub fn actionable(&self) -> impl Iterator<Item = &RollbackObject> {
        self.objects.iter().filter(|o| o.rollback_operation.is_some())
    }
}

/// Computes rollback plans from backup metadata.
#[derive(Debug, Clone, Default)]
pub struct RollbackPlanner {
    backup_dir: Option<PathBuf>,
}

impl RollbackPlanner {
    /// Create a planner that trusts the recorded snapshot paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also require snapshot files to exist under this backup directory.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Plan the rollback of a backup.
    pub fn plan(&self, metadata: &BackupMetadata) -> RollbackPlan {
        let objects = metadata
            .objects
            .iter()
            .rev()
            .map(|object| self.plan_object(object))
            .collect::<Vec<_>>();

        for object in &objects {
            if let Some(warning) = object.warning() {
                tracing::warn!(
                    object = %object.object_name,
                    status = %object.status,
                    "{}",
                    warning
                );
            }
        }

        RollbackPlan {
            backup_timestamp: metadata.timestamp,
            phase_number: metadata.phase_number,
            objects,
        }
    }

    fn plan_object(&self, object: &BackupObject) -> RollbackObject {
        let rollback_operation = object.operation.rollback_operation();

        let backup_file = match object.operation.required_snapshot() {
            Some(SnapshotKind::PreMigration) => object.backup_file.clone(),
            Some(SnapshotKind::PostMigration) => object.post_migration_backup_file.clone(),
            None => None,
        };

        let status = match (rollback_operation, &backup_file) {
            (None, _) => RollbackStatus::NoInverse,
            (Some(_), None) => RollbackStatus::MissingBackup,
            (Some(_), Some(file)) if !self.snapshot_exists(file) => RollbackStatus::MissingBackup,
            (Some(_), Some(_)) => RollbackStatus::Ready,
        };

        RollbackObject {
            object_name: object.object_name.clone(),
            original_operation: object.operation,
            rollback_operation,
            external_id: object.external_id.clone(),
            backup_file,
            status,
        }
    }

    fn snapshot_exists(&self, file: &Path) -> bool {
        match &self.backup_dir {
            Some(dir) => dir.join(file).is_file(),
            None => true,
        }
    }
}

/// Result of rolling back one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRollbackResult {
    /// Object name.
    pub object_name: String,
    /// Whether the engine reported success.
    pub succeeded: bool,
    /// Records processed.
    pub record_count: u64,
    /// Engine message, if any.
    pub message: Option<String>,
}

/// Outcome of a rollback run or simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    /// Whether this was a simulation.
    pub simulated: bool,
    /// Per-object results.
    pub objects: Vec<ObjectRollbackResult>,
}

impl RollbackReport {
    /// Objects the engine failed to roll back.
    pub fn failures(&self) -> Vec<&ObjectRollbackResult> {
        self.objects.iter().filter(|o| !o.succeeded).collect()
    }
}

/// The migration engine that carries out a rollback plan.
#[async_trait]
pub trait RollbackExecutor: Send + Sync {
    /// Dry-run the plan without touching the target store.
    async fn simulate(
        &self,
        backup_dir: &Path,
        plan: &RollbackPlan,
    ) -> Result<RollbackReport, BackupError>;

    /// Execute the plan.
    async fn execute(
        &self,
        backup_dir: &Path,
        plan: &RollbackPlan,
    ) -> Result<RollbackReport, BackupError>;
}
