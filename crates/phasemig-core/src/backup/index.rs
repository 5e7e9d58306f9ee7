//! Index of prior backups per configuration, phase and object.
//!
//! Backups live under `<root>/<config name>/<backup dir>/metadata.json`.
//! Backup directories are named `phase-<n>-<timestamp>`; the phase recorded in
//! the metadata takes precedence over the name.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{BackupMetadata, BackupObject};
use crate::error::BackupError;

/// One backup on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Backup directory.
    pub dir: PathBuf,
    /// Parsed metadata.
    pub metadata: BackupMetadata,
}

impl BackupEntry {
    /// Phase of the backup, from the metadata or the directory name.
    pub fn phase_number(&self) -> Option<u32> {
        self.metadata
            .phase_number
            .or_else(|| {
                self.dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(phase_from_dir_name)
            })
    }
}

/// Backups of one configuration, newest first.
#[derive(Debug, Clone, Default)]
pub struct BackupIndex {
    entries: Vec<BackupEntry>,
}

impl BackupIndex {
    /// Build an index from entries.
    pub fn from_entries(mut entries: Vec<BackupEntry>) -> Self {
        entries.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        Self { entries }
    }

    /// Scan the backups of a configuration.
    ///
    /// A missing configuration directory yields an empty index. Backup
    /// directories whose metadata cannot be read are skipped.
    pub fn load(root: impl AsRef<Path>, config_name: &str) -> Result<Self, BackupError> {
        let config_dir = root.as_ref().join(config_name);
        if !config_dir.is_dir() {
            return Ok(Self::default());
        }

        let mut entries = Vec::new();
        for dir_entry in std::fs::read_dir(&config_dir)? {
            let dir = dir_entry?.path();
            if !dir.is_dir() {
                continue;
            }

            match BackupMetadata::read_from(&dir) {
                Ok(metadata) => entries.push(BackupEntry { dir, metadata }),
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable backup");
                }
            }
        }

        tracing::debug!(
            config = config_name,
            backups = entries.len(),
            "backup index loaded"
        );
        Ok(Self::from_entries(entries))
    }

    /// All backups, newest first.
    pub fn entries(&self) -> &[BackupEntry] {
        &self.entries
    }

    /// Number of backups.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no backups.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Backups of a phase, newest first.
    pub fn for_phase(&self, phase_number: u32) -> Vec<&BackupEntry> {
        self.entries
            .iter()
            .filter(|e| e.phase_number() == Some(phase_number))
            .collect()
    }

    /// Most recent backup of a phase.
    pub fn latest_for_phase(&self, phase_number: u32) -> Option<&BackupEntry> {
        self.entries
            .iter()
            .find(|e| e.phase_number() == Some(phase_number))
    }

    /// Every backed-up instance of an object in a phase, newest first.
    pub fn for_object(
        &self,
        phase_number: u32,
        object_name: &str,
    ) -> Vec<(&BackupEntry, &BackupObject)> {
        self.for_phase(phase_number)
            .into_iter()
            .flat_map(|entry| {
                entry
                    .metadata
                    .objects
                    .iter()
                    .filter(move |o| o.object_name == object_name)
                    .map(move |o| (entry, o))
            })
            .collect()
    }
}

/// Directory name for a new backup of a phase.
pub fn backup_dir_name(phase_number: u32, timestamp: DateTime<Utc>) -> String {
    format!(
        "phase-{}-{}",
        phase_number,
        timestamp.format("%Y%m%dT%H%M%SZ")
    )
}

/// Write backup metadata into a fresh directory under `<root>/<config name>`.
///
/// Never reuses a directory: when the timestamped name is taken, a `-2`,
/// `-3`, ... suffix is appended.
pub fn record_backup(
    root: impl AsRef<Path>,
    config_name: &str,
    phase_number: u32,
    metadata: &BackupMetadata,
) -> Result<PathBuf, BackupError> {
    let config_dir = root.as_ref().join(config_name);
    std::fs::create_dir_all(&config_dir)?;

    let base = backup_dir_name(phase_number, metadata.timestamp);
    let mut attempt = 1u32;
    let dir = loop {
        let name = match attempt {
            1 => base.clone(),
            n => format!("{}-{}", base, n),
        };
        let dir = config_dir.join(name);
        match std::fs::create_dir(&dir) {
            Ok(()) => break dir,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    };
    metadata.write_to(&dir)?;
    tracing::info!(
        config = config_name,
        phase = phase_number,
        objects = metadata.objects.len(),
        dir = %dir.display(),
        "backup recorded"
    );
    Ok(dir)
}

fn phase_from_dir_name(name: &str) -> Option<u32> {
    name.strip_prefix("phase-")?.split('-').next()?.parse().ok()
}
