//! Asynchronous child-record resolution.
//!
//! Each requested child object is fetched by its own task, bounded by the
//! fetch timeout, and answered on a channel. Responses are applied one at a
//! time by the owner of the [`MigrationConfig`]; the tasks never touch it.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::{
    ChildConfig, ChildFetchRequest, ChildFetcher, FetchKey, FetchResponse, FetchState,
    ResolverConfig,
};
use crate::catalog::RelationshipCatalog;
use crate::config::MigrationConfig;
use crate::error::{ConfigError, FetchError};
use crate::key::Record;
use crate::selection::{is_key_prefix, KeyMatcher, MatchRule, MergeOutcome};

/// Result of applying one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Cell the response belonged to.
    pub key: FetchKey,
    /// Whether it answered the outstanding generation.
    pub current: bool,
    /// Merge counters across parents.
    pub merged: MergeOutcome,
    /// Records that could not be tied to a requested parent.
    pub uncorrelated: usize,
}

/// Fetches child records for selected parents and merges them into a configuration.
pub struct ChildRecordResolver {
    fetcher: Arc<dyn ChildFetcher>,
    config: ResolverConfig,
    states: BTreeMap<FetchKey, FetchState>,
    next_generation: u64,
    tx: mpsc::Sender<FetchResponse>,
    rx: mpsc::Receiver<FetchResponse>,
}

impl ChildRecordResolver {
    /// Create a resolver over a fetch collaborator.
    pub fn new(fetcher: Arc<dyn ChildFetcher>, config: ResolverConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        Self {
            fetcher,
            config,
            states: BTreeMap::new(),
            next_generation: 0,
            tx,
            rx,
        }
    }

    /// The resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Request the children of every selected record of `parent_object`.
    ///
    /// The configuration is validated first; nothing is sent when it fails.
    /// Returns the keys now outstanding, empty when the parent has no child
    /// relationships or no selected records. Must be called within a Tokio
    /// runtime.
    pub fn request_children(
        &mut self,
        catalog: &RelationshipCatalog,
        config: &MigrationConfig,
        phase: u32,
        parent_object: &str,
    ) -> Result<Vec<FetchKey>, ConfigError> {
        config.validate_for_phase(catalog, phase)?;

        let edges: Vec<_> = catalog
            .edges_for_parent(phase, parent_object)
            .into_iter()
            .filter(|e| !config.is_excluded(phase, &e.child_object))
            .collect();
        let Some(first) = edges.first() else {
            tracing::debug!(phase, parent = parent_object, "no child relationships");
            return Ok(Vec::new());
        };

        let parent_external_ids: Vec<String> = config
            .selection
            .selected_external_ids(phase, parent_object)
            .into_iter()
            .map(String::from)
            .collect();
        if parent_external_ids.is_empty() {
            tracing::debug!(phase, parent = parent_object, "no selected parents");
            return Ok(Vec::new());
        }

        let request = Arc::new(ChildFetchRequest {
            phase_number: phase,
            parent_object: parent_object.to_string(),
            parent_external_id_field: first.parent_key_spec.clone(),
            parent_external_ids,
            child_configs: edges
                .iter()
                .map(|e| ChildConfig {
                    child_object: e.child_object.clone(),
                    relationship_field: e.relationship_field.clone(),
                    child_external_id: e.child_key_spec.clone(),
                })
                .collect(),
            org_alias: config.source_org.clone().unwrap_or_default(),
        });

        self.next_generation += 1;
        let generation = self.next_generation;

        let mut keys = Vec::with_capacity(request.child_configs.len());
        for child in &request.child_configs {
            let key = FetchKey::new(phase, parent_object, child.child_object.clone());
            if let Some(FetchState::Requested { generation: previous }) = self.states.get(&key) {
                tracing::debug!(key = %key, previous, generation, "superseding outstanding fetch");
            }
            self.states
                .insert(key.clone(), FetchState::Requested { generation });
            self.spawn_fetch(key.clone(), generation, Arc::clone(&request), child.clone());
            keys.push(key);
        }

        tracing::info!(
            phase,
            parent = parent_object,
            parents = request.parent_external_ids.len(),
            children = keys.len(),
            generation,
            "child fetch requested"
        );
        Ok(keys)
    }

    fn spawn_fetch(
        &self,
        key: FetchKey,
        generation: u64,
        request: Arc<ChildFetchRequest>,
        child: ChildConfig,
    ) {
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.tx.clone();
        let fetch_timeout = self.config.fetch_timeout;

        tokio::spawn(async move {
            let task_request = Arc::clone(&request);
            let task_child = child.clone();
            let mut handle = tokio::spawn(async move {
                fetcher.fetch_children(&task_request, &task_child).await
            });

            let result = match timeout(fetch_timeout, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::warn!(key = %key, error = %e, "fetch task aborted");
                    Err(FetchError::Cancelled(child.child_object.clone()))
                }
                Err(_) => {
                    handle.abort();
                    Err(FetchError::TimedOut(child.child_object.clone()))
                }
            };

            let response = FetchResponse {
                key,
                generation,
                parent_external_ids: request.parent_external_ids.clone(),
                result,
            };
            if tx.send(response).await.is_err() {
                tracing::debug!("resolver dropped before fetch completed");
            }
        });
    }

    /// Number of keys waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.states.values().filter(|s| s.is_pending()).count()
    }

    /// Wait for the next response. `None` when nothing is outstanding.
    pub async fn next_response(&mut self) -> Option<FetchResponse> {
        if self.outstanding() == 0 {
            return None;
        }
        self.rx.recv().await
    }

    /// A response that has already arrived, without waiting.
    pub fn try_next_response(&mut self) -> Option<FetchResponse> {
        self.rx.try_recv().ok()
    }

    /// Apply one response to the configuration.
    ///
    /// Each record is tied to a requested parent through the parent reference
    /// it carries, falling back to the catalog's match rule; records that
    /// cannot be tied are skipped. A response for a superseded generation is
    /// still merged but leaves the key's state alone; a superseded failure is
    /// ignored. Parents deselected since the request receive nothing.
    pub fn apply(
        &mut self,
        catalog: &RelationshipCatalog,
        config: &mut MigrationConfig,
        response: FetchResponse,
    ) -> ApplyReport {
        let FetchResponse {
            key,
            generation,
            parent_external_ids,
            result,
        } = response;

        let current = matches!(
            self.states.get(&key),
            Some(FetchState::Requested { generation: g }) if *g == generation
        );
        let mut report = ApplyReport {
            key: key.clone(),
            current,
            merged: MergeOutcome::default(),
            uncorrelated: 0,
        };

        let records = match result {
            Ok(records) => records,
            Err(e) if current => {
                tracing::warn!(key = %key, error = %e, "child fetch failed");
                let state = match e {
                    FetchError::TimedOut(_) => FetchState::TimedOut,
                    other => FetchState::Failed(other.to_string()),
                };
                self.states.insert(key, state);
                return report;
            }
            Err(e) => {
                tracing::debug!(key = %key, generation, error = %e, "ignoring stale fetch failure");
                return report;
            }
        };

        let Some(edge) = catalog.edge(key.phase, &key.parent_object, &key.child_object) else {
            tracing::warn!(key = %key, "fetched children have no relationship in the catalog");
            if current {
                self.states.insert(
                    key,
                    FetchState::Failed("relationship not in catalog".to_string()),
                );
            }
            return report;
        };
        let rule = catalog.match_rule(key.phase, &key.parent_object, &key.child_object);
        let relationship = edge.relationship_name();

        let still_selected: Vec<&str> = parent_external_ids
            .iter()
            .map(String::as_str)
            .filter(|p| {
                config
                    .selection
                    .selected(key.phase, &key.parent_object)
                    .iter()
                    .any(|e| e.external_id == *p)
            })
            .collect();

        let received = records.len();
        let mut by_parent: BTreeMap<&str, Vec<Record>> =
            still_selected.iter().map(|p| (*p, Vec::new())).collect();

        for record in records {
            let parent_key = edge.parent_key_spec.render_parent(&record, &relationship);
            let child_key = edge.child_key_spec.render(&record);
            match correlate(&parent_external_ids, &parent_key, &child_key, rule) {
                Some(parent) => {
                    if let Some(children) = by_parent.get_mut(parent) {
                        children.push(record);
                    }
                }
                None => {
                    tracing::debug!(
                        key = %key,
                        id = ?record.id(),
                        parent_key = %parent_key,
                        "child record matches no requested parent"
                    );
                    report.uncorrelated += 1;
                }
            }
        }

        for (parent, children) in &by_parent {
            let outcome = config.selection.merge_children(
                key.phase,
                &key.parent_object,
                parent,
                &key.child_object,
                children,
                &edge.child_key_spec,
            );
            report.merged.absorb(outcome);
        }

        if current {
            tracing::info!(
                key = %key,
                records = received,
                added = report.merged.added,
                uncorrelated = report.uncorrelated,
                "child fetch fulfilled"
            );
            self.states
                .insert(key, FetchState::Fulfilled { records: received });
        } else {
            tracing::debug!(key = %key, generation, "merged stale response");
        }
        report
    }

    /// Apply responses until nothing is outstanding.
    pub async fn drain(
        &mut self,
        catalog: &RelationshipCatalog,
        config: &mut MigrationConfig,
    ) -> Vec<ApplyReport> {
        let mut reports = Vec::new();
        while let Some(response) = self.next_response().await {
            reports.push(self.apply(catalog, config, response));
        }
        reports
    }

    /// Apply every response that has already arrived.
    pub fn apply_ready(
        &mut self,
        catalog: &RelationshipCatalog,
        config: &mut MigrationConfig,
    ) -> Vec<ApplyReport> {
        let mut reports = Vec::new();
        while let Some(response) = self.try_next_response() {
            reports.push(self.apply(catalog, config, response));
        }
        reports
    }

    /// Re-merge the cached children of a phase without fetching anything.
    ///
    /// Keys with cached cells become fulfilled unless a fetch is outstanding.
    pub fn load_from_cache(
        &mut self,
        catalog: &RelationshipCatalog,
        config: &mut MigrationConfig,
        phase: u32,
    ) -> MergeOutcome {
        let outcome = config.remerge_cached_children(catalog, phase);

        let mut counts: BTreeMap<FetchKey, usize> = BTreeMap::new();
        for (parent_object, _, child_object, records) in config.selection.queried_cells(phase) {
            if catalog.edge(phase, parent_object, child_object).is_none() {
                continue;
            }
            *counts
                .entry(FetchKey::new(phase, parent_object, child_object))
                .or_default() += records.len();
        }

        let keys = counts.len();
        for (key, records) in counts {
            if !self.state(&key).is_pending() {
                self.states.insert(key, FetchState::Fulfilled { records });
            }
        }

        tracing::info!(
            phase,
            keys,
            added = outcome.added,
            "children loaded from cache"
        );
        outcome
    }

    /// Whether every fetch for a parent object has resolved.
    pub fn is_stable(&self, phase: u32, parent_object: &str) -> bool {
        !self
            .states
            .iter()
            .any(|(k, s)| {
                k.phase == phase && k.parent_object == parent_object && s.is_pending()
            })
    }

    /// State of a key; `Idle` when never requested.
    pub fn state(&self, key: &FetchKey) -> FetchState {
        self.states.get(key).cloned().unwrap_or_default()
    }

    /// Every known key with its state.
    pub fn states(&self) -> impl Iterator<Item = (&FetchKey, &FetchState)> {
        self.states.iter()
    }

    /// Forget the states of a phase. Late responses for it are then stale.
    pub fn reset_phase(&mut self, phase: u32) {
        self.states.retain(|k, _| k.phase != phase);
    }

    /// Count several objects concurrently, each bounded by the count timeout.
    pub async fn object_counts(
        &self,
        objects: &[&str],
        org_alias: &str,
    ) -> Vec<(String, Option<u64>)> {
        let counts = join_all(objects.iter().map(|o| self.object_count(o, org_alias))).await;
        objects.iter().map(|o| o.to_string()).zip(counts).collect()
    }

    /// Count the records of an object, giving up after the count timeout.
    pub async fn object_count(&self, object: &str, org_alias: &str) -> Option<u64> {
        match timeout(
            self.config.count_timeout,
            self.fetcher.count_records(object, org_alias),
        )
        .await
        {
            Ok(Ok(count)) => Some(count),
            Ok(Err(e)) => {
                tracing::warn!(object, error = %e, "record count failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    object,
                    timeout_ms = self.config.count_timeout.as_millis() as u64,
                    "record count timed out"
                );
                None
            }
        }
    }
}

/// The requested parent a child record belongs to.
///
/// For each key, a parent leading the key wins over any parent the rule
/// accepts, so overlapping parent keys resolve to the closest one.
fn correlate<'a>(
    parents: &'a [String],
    parent_key: &str,
    child_key: &str,
    rule: MatchRule,
) -> Option<&'a str> {
    parents
        .iter()
        .find(|p| p.as_str() == parent_key)
        .or_else(|| parents.iter().find(|p| is_key_prefix(p, parent_key)))
        .or_else(|| parents.iter().find(|p| rule.matches(p, parent_key)))
        .or_else(|| parents.iter().find(|p| is_key_prefix(p, child_key)))
        .or_else(|| parents.iter().find(|p| rule.matches(p, child_key)))
        .map(String::as_str)
}
