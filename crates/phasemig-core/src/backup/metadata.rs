//! Backup metadata documents.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DmlOperation;
use crate::error::BackupError;

/// File name of the metadata document inside a backup directory.
pub const METADATA_FILE: &str = "metadata.json";

/// What was backed up for one migrated object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupObject {
    /// Object name.
    pub object_name: String,
    /// Operation performed on the target.
    pub operation: DmlOperation,
    /// External-id spec used for the operation.
    pub external_id: String,
    /// Pre-migration snapshot, relative to the backup directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_file: Option<PathBuf>,
    /// Records in the pre-migration snapshot.
    #[serde(default)]
    pub record_count: u64,
    /// Query used to take the pre-migration snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_query: Option<String>,
    /// Post-migration snapshot with newly assigned ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_migration_backup_file: Option<PathBuf>,
    /// Records in the post-migration snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_migration_record_count: Option<u64>,
}

impl BackupObject {
    /// Create an entry without snapshots.
    pub fn new(
        object_name: impl Into<String>,
        operation: DmlOperation,
        external_id: impl Into<String>,
    ) -> Self {
        Self {
            object_name: object_name.into(),
            operation,
            external_id: external_id.into(),
            backup_file: None,
            record_count: 0,
            original_query: None,
            post_migration_backup_file: None,
            post_migration_record_count: None,
        }
    }

    /// Set the pre-migration snapshot.
    pub fn with_backup_file(mut self, file: impl Into<PathBuf>, record_count: u64) -> Self {
        self.backup_file = Some(file.into());
        self.record_count = record_count;
        self
    }

    /// Set the post-migration snapshot.
    pub fn with_post_migration_backup_file(
        mut self,
        file: impl Into<PathBuf>,
        record_count: u64,
    ) -> Self {
        self.post_migration_backup_file = Some(file.into());
        self.post_migration_record_count = Some(record_count);
        self
    }

    /// Set the snapshot query.
    pub fn with_original_query(mut self, query: impl Into<String>) -> Self {
        self.original_query = Some(query.into());
        self
    }
}

/// Metadata written once per completed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    /// When the backup completed.
    pub timestamp: DateTime<Utc>,
    /// Phase the backup was taken for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_number: Option<u32>,
    /// Migrated objects, in migration order.
    pub objects: Vec<BackupObject>,
}

impl BackupMetadata {
    /// Create metadata with no objects.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            phase_number: None,
            objects: Vec::new(),
        }
    }

    /// Set the phase.
    pub fn with_phase(mut self, phase_number: u32) -> Self {
        self.phase_number = Some(phase_number);
        self
    }

    /// Add an object.
    pub fn with_object(mut self, object: BackupObject) -> Self {
        self.objects.push(object);
        self
    }

    /// Read the metadata document of a backup directory.
    pub fn read_from(dir: impl AsRef<Path>) -> Result<Self, BackupError> {
        let path = dir.as_ref().join(METADATA_FILE);
        if !path.is_file() {
            return Err(BackupError::MissingMetadata(dir.as_ref().to_path_buf()));
        }

        let json = std::fs::read_to_string(&path)?;
        serde_json::from_str(&json).map_err(|source| BackupError::InvalidMetadata { path, source })
    }

    /// Write the metadata document into a backup directory, creating it if needed.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, BackupError> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(METADATA_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|source| {
            BackupError::InvalidMetadata {
                path: path.clone(),
                source,
            }
        })?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}
