//! The child-record fetch collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::key::{KeySpec, Record};

/// One child object to fetch for a set of parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildConfig {
    /// Child object name.
    pub child_object: String,
    /// Lookup field on the child pointing at the parent.
    pub relationship_field: String,
    /// Natural key of the child.
    pub child_external_id: KeySpec,
}

/// A batched request for the children of selected parents.
///
/// Answered with one batch per child object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildFetchRequest {
    /// Phase the request belongs to.
    pub phase_number: u32,
    /// Parent object name.
    pub parent_object: String,
    /// Natural key of the parent.
    pub parent_external_id_field: KeySpec,
    /// Rendered natural keys of the parents whose children are wanted.
    pub parent_external_ids: Vec<String>,
    /// Every child object related to the parent in this phase.
    pub child_configs: Vec<ChildConfig>,
    /// Connection to query.
    pub org_alias: String,
}

impl ChildFetchRequest {
    /// Configuration of one child object.
    pub fn child_config(&self, child_object: &str) -> Option<&ChildConfig> {
        self.child_configs
            .iter()
            .find(|c| c.child_object == child_object)
    }
}

/// Queries the source store for child records.
///
/// Child records must carry their parent as a nested reference under the
/// relationship name of `relationship_field`, with at least the fields of
/// the parent key spec.
#[async_trait]
pub trait ChildFetcher: Send + Sync {
    /// Fetch the records of one child object for every parent of the request.
    async fn fetch_children(
        &self,
        request: &ChildFetchRequest,
        child: &ChildConfig,
    ) -> Result<Vec<Record>, FetchError>;

    /// Count the records of an object.
    async fn count_records(&self, object: &str, org_alias: &str) -> Result<u64, FetchError>;
}
