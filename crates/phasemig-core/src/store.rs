//! Persistent store for migration configurations.

use chrono::{DateTime, Utc};
use sled::{Db, Tree};

use crate::config::MigrationConfig;
use crate::error::Error;

/// Tree name for configuration documents.
const DOCUMENT_TREE: &str = "configs:documents";

/// Tree name for per-configuration metadata.
const META_TREE: &str = "configs:meta";

/// Summary of a stored configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConfig {
    /// Configuration name.
    pub name: String,
    /// Last save time, when recorded.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Named configuration documents stored as JSON in sled.
pub struct ConfigStore {
    document_tree: Tree,
    meta_tree: Tree,
}

impl ConfigStore {
    /// Open or create the store in the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        Ok(Self {
            document_tree: db.open_tree(DOCUMENT_TREE)?,
            meta_tree: db.open_tree(META_TREE)?,
        })
    }

    /// Save a configuration, replacing any document with the same name.
    pub fn save(&self, config: &MigrationConfig) -> Result<(), Error> {
        let json = serde_json::to_vec(config)?;
        self.document_tree.insert(config.name.as_bytes(), json)?;
        self.meta_tree
            .insert(config.name.as_bytes(), Utc::now().to_rfc3339().as_bytes())?;

        tracing::debug!(
            config = %config.name,
            completed_phases = config.completed_phases.len(),
            "configuration saved"
        );
        Ok(())
    }

    /// Load a configuration by name.
    pub fn load(&self, name: &str) -> Result<Option<MigrationConfig>, Error> {
        match self.document_tree.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a configuration, failing if it does not exist.
    pub fn get(&self, name: &str) -> Result<MigrationConfig, Error> {
        self.load(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Whether a configuration exists.
    pub fn contains(&self, name: &str) -> Result<bool, Error> {
        Ok(self.document_tree.contains_key(name.as_bytes())?)
    }

    /// All stored configurations, sorted by name.
    pub fn list(&self) -> Result<Vec<StoredConfig>, Error> {
        let mut configs = Vec::new();
        for item in self.document_tree.iter() {
            let (key, _) = item?;
            let name = String::from_utf8_lossy(&key).into_owned();
            let updated_at = self
                .meta_tree
                .get(&key)?
                .and_then(|bytes| std::str::from_utf8(&bytes).ok().map(String::from))
                .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
                .map(|ts| ts.with_timezone(&Utc));
            configs.push(StoredConfig { name, updated_at });
        }
        Ok(configs)
    }

    /// Delete a configuration. Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool, Error> {
        self.meta_tree.remove(name.as_bytes())?;
        Ok(self.document_tree.remove(name.as_bytes())?.is_some())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.document_tree.flush()?;
        self.meta_tree.flush()?;
        Ok(())
    }
}
