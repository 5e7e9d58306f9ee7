//! Child fetcher backed by an offline record export.
//!
//! The export directory holds one `<Object>.json` file per object, each a JSON
//! array of records with relationship fields nested as objects.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use phasemig_core::key::relationship_name;
use phasemig_core::resolver::{ChildConfig, ChildFetchRequest, ChildFetcher};
use phasemig_core::{FetchError, Record};
use serde_json::Value;

/// Reads child records from `<dir>/<Object>.json`.
pub struct JsonExportFetcher {
    dir: PathBuf,
}

impl JsonExportFetcher {
    /// Create a fetcher over an export directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn object_path(&self, object: &str) -> PathBuf {
        self.dir.join(format!("{}.json", object))
    }

    async fn read_records(&self, object: &str) -> Result<Vec<Record>, FetchError> {
        read_export(&self.object_path(object), object).await
    }
}

async fn read_export(path: &Path, object: &str) -> Result<Vec<Record>, FetchError> {
    let query_error = |reason: String| FetchError::Query {
        object: object.to_string(),
        reason,
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| query_error(format!("{}: {}", path.display(), e)))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| query_error(format!("{}: {}", path.display(), e)))?;

    let Value::Array(items) = value else {
        return Err(query_error(format!(
            "{}: expected an array of records",
            path.display()
        )));
    };

    let total = items.len();
    let records: Vec<Record> = items.into_iter().filter_map(Record::from_value).collect();
    if records.len() < total {
        tracing::warn!(
            object,
            skipped = total - records.len(),
            "skipping export entries that are not records"
        );
    }
    Ok(records)
}

#[async_trait]
impl ChildFetcher for JsonExportFetcher {
    async fn fetch_children(
        &self,
        request: &ChildFetchRequest,
        child: &ChildConfig,
    ) -> Result<Vec<Record>, FetchError> {
        let relationship = relationship_name(&child.relationship_field);
        let records = self.read_records(&child.child_object).await?;

        let matched: Vec<Record> = records
            .into_iter()
            .filter(|record| {
                let parent = request
                    .parent_external_id_field
                    .render_parent(record, &relationship);
                request.parent_external_ids.contains(&parent)
            })
            .collect();

        tracing::debug!(
            phase = request.phase_number,
            parent = %request.parent_object,
            child = %child.child_object,
            matched = matched.len(),
            "read children from export"
        );
        Ok(matched)
    }

    async fn count_records(&self, object: &str, _org_alias: &str) -> Result<u64, FetchError> {
        Ok(self.read_records(object).await?.len() as u64)
    }
}
