//! Integration tests for phase selection, child resolution and rollback planning.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

use phasemig_core::backup::{record_backup, BackupIndex, BackupMetadata, BackupObject};
use phasemig_core::resolver::{
    ChildConfig, ChildFetchRequest, ChildFetcher, ChildRecordResolver, FetchKey, FetchState,
    ResolverConfig,
};
use phasemig_core::{
    ConfigStore, DmlOperation, FetchError, MigrationConfig, Record, RelationshipCatalog,
    RollbackPlanner, RollbackStatus, SelectionEntry,
};

/// Serves child records from memory, filtered to the requested parents.
struct MemoryFetcher {
    records: BTreeMap<String, Vec<Record>>,
}

impl MemoryFetcher {
    fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    fn with_records(mut self, child: &str, records: Vec<Record>) -> Self {
        self.records.insert(child.to_string(), records);
        self
    }
}

#[async_trait]
impl ChildFetcher for MemoryFetcher {
    async fn fetch_children(
        &self,
        request: &ChildFetchRequest,
        child: &ChildConfig,
    ) -> Result<Vec<Record>, FetchError> {
        let relationship = phasemig_core::key::relationship_name(&child.relationship_field);
        Ok(self
            .records
            .get(&child.child_object)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| {
                        let parent = request
                            .parent_external_id_field
                            .render_parent(r, &relationship);
                        request.parent_external_ids.contains(&parent)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_records(&self, object: &str, _org_alias: &str) -> Result<u64, FetchError> {
        Ok(self.records.get(object).map_or(0, |r| r.len() as u64))
    }
}

struct TestContext {
    catalog: RelationshipCatalog,
    store: ConfigStore,
    _db: sled::Db,
}

impl TestContext {
    fn new() -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = ConfigStore::open(&db).unwrap();
        Self {
            catalog: RelationshipCatalog::builtin().unwrap(),
            store,
            _db: db,
        }
    }

    fn resolver(&self, fetcher: MemoryFetcher) -> ChildRecordResolver {
        ChildRecordResolver::new(
            Arc::new(fetcher),
            ResolverConfig::new().with_fetch_timeout(Duration::from_secs(5)),
        )
    }
}

fn rule_child(id: &str, relationship: &str, rule: &str, field: &str, value: i64) -> Record {
    Record::new()
        .with_field("Id", id)
        .with_field(field, value)
        .with_reference(relationship, Record::new().with_field("Name", rule))
}

fn spring_config() -> MigrationConfig {
    MigrationConfig::new("spring-release")
        .with_source_org("dev")
        .with_target_org("uat")
}

#[tokio::test]
async fn test_product_rule_error_condition_scenario() {
    let ctx = TestContext::new();
    let mut config = spring_config();
    config
        .select(&ctx.catalog, 2, "ProductRule", SelectionEntry::new("Discount Rule"))
        .unwrap();

    let fetcher = MemoryFetcher::new().with_records(
        "ErrorCondition",
        vec![rule_child("a0B1", "Rule", "Discount Rule", "Index", 0)],
    );
    let mut resolver = ctx.resolver(fetcher);

    resolver
        .request_children(&ctx.catalog, &config, 2, "ProductRule")
        .unwrap();
    resolver.drain(&ctx.catalog, &mut config).await;

    assert_eq!(config.selection.selected_count_for(2, "ErrorCondition"), 1);
    assert_eq!(
        config.selection.selected(2, "ErrorCondition"),
        &[SelectionEntry::new("Discount Rule|0").with_id("a0B1")]
    );
    assert_eq!(
        resolver.state(&FetchKey::new(2, "ProductRule", "ErrorCondition")),
        FetchState::Fulfilled { records: 1 }
    );
}

#[tokio::test]
async fn test_refetch_does_not_grow_selection() {
    let ctx = TestContext::new();
    let mut config = spring_config();
    for rule in ["Discount Rule", "Bundle Rule"] {
        config
            .select(&ctx.catalog, 2, "ProductRule", SelectionEntry::new(rule))
            .unwrap();
    }

    let fetcher = MemoryFetcher::new()
        .with_records(
            "ErrorCondition",
            vec![
                rule_child("e1", "Rule", "Discount Rule", "Index", 0),
                rule_child("e2", "Rule", "Bundle Rule", "Index", 0),
                rule_child("e3", "Rule", "Unselected Rule", "Index", 0),
            ],
        )
        .with_records(
            "ProductAction",
            vec![rule_child("p1", "Rule", "Bundle Rule", "Order", 10)],
        );
    let mut resolver = ctx.resolver(fetcher);

    resolver
        .request_children(&ctx.catalog, &config, 2, "ProductRule")
        .unwrap();
    resolver.drain(&ctx.catalog, &mut config).await;
    let first = config.selection.selected_count(2);

    resolver
        .request_children(&ctx.catalog, &config, 2, "ProductRule")
        .unwrap();
    resolver.drain(&ctx.catalog, &mut config).await;

    assert_eq!(first, 5);
    assert_eq!(config.selection.selected_count(2), first);
    assert_eq!(
        config.selection.child_count(2, "ProductRule", "Bundle Rule"),
        2
    );
    assert_eq!(
        config.selection.selected_external_ids(2, "ProductAction"),
        vec!["Bundle Rule|10"]
    );
}

#[tokio::test]
async fn test_saved_config_reloads_from_cache() {
    let ctx = TestContext::new();
    let mut config = spring_config();
    config
        .select(&ctx.catalog, 3, "PriceRule", SelectionEntry::new("Volume Discount"))
        .unwrap();

    let fetcher = MemoryFetcher::new().with_records(
        "PriceCondition",
        vec![
            rule_child("c1", "Rule", "Volume Discount", "Index", 1),
            rule_child("c2", "Rule", "Volume Discount", "Index", 2),
        ],
    );
    let mut resolver = ctx.resolver(fetcher);
    resolver
        .request_children(&ctx.catalog, &config, 3, "PriceRule")
        .unwrap();
    resolver.drain(&ctx.catalog, &mut config).await;
    ctx.store.save(&config).unwrap();

    let mut reloaded = ctx.store.get("spring-release").unwrap();
    assert_eq!(reloaded, config);

    let mut fresh = ctx.resolver(MemoryFetcher::new());
    let outcome = fresh.load_from_cache(&ctx.catalog, &mut reloaded, 3);

    assert_eq!(outcome.added, 0);
    assert_eq!(outcome.duplicates, 2);
    assert_eq!(reloaded.selection.selected_count(3), 3);
    assert!(fresh.is_stable(3, "PriceRule"));

    let plan = reloaded.phase_plan(&ctx.catalog, 3).unwrap();
    assert_eq!(plan.record_count(), 3);
    assert_eq!(plan.operation, DmlOperation::Upsert);
}

#[tokio::test]
async fn test_deselect_drops_bundled_children() {
    let ctx = TestContext::new();
    let mut config = spring_config();
    config
        .select(&ctx.catalog, 6, "ApprovalRule", SelectionEntry::new("Large Deal"))
        .unwrap();

    let fetcher = MemoryFetcher::new().with_records(
        "ApprovalCondition",
        vec![rule_child("ac1", "ApprovalRule", "Large Deal", "Index", 1)],
    );
    let mut resolver = ctx.resolver(fetcher);
    resolver
        .request_children(&ctx.catalog, &config, 6, "ApprovalRule")
        .unwrap();
    resolver.drain(&ctx.catalog, &mut config).await;
    assert_eq!(config.selection.selected_count(6), 2);

    config.deselect(&ctx.catalog, 6, "ApprovalRule", "Large Deal");

    assert_eq!(config.selection.selected_count(6), 0);
    assert!(!config.selection.has_queried_children(6));
}

#[test]
fn test_backup_to_rollback_plan() {
    let root = tempfile::tempdir().unwrap();
    let metadata = BackupMetadata::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
        .with_phase(2)
        .with_object(
            BackupObject::new("ProductRule", DmlOperation::Upsert, "Name")
                .with_backup_file("ProductRule.csv", 2),
        )
        .with_object(
            BackupObject::new("ErrorCondition", DmlOperation::Insert, "Rule.Name;Index")
                .with_post_migration_backup_file("ErrorCondition_post.csv", 1),
        )
        .with_object(BackupObject::new(
            "ProductAction",
            DmlOperation::Update,
            "Rule.Name;Order",
        ));
    let dir = record_backup(root.path(), "spring-release", 2, &metadata).unwrap();
    std::fs::write(dir.join("ProductRule.csv"), "Id,Name\n").unwrap();
    std::fs::write(dir.join("ErrorCondition_post.csv"), "Id,Index\n").unwrap();

    let index = BackupIndex::load(root.path(), "spring-release").unwrap();
    let latest = index.latest_for_phase(2).unwrap();
    let plan = RollbackPlanner::new()
        .with_backup_dir(&latest.dir)
        .plan(&latest.metadata);

    let summary: Vec<_> = plan
        .objects
        .iter()
        .map(|o| (o.object_name.as_str(), o.rollback_operation, o.status))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("ProductAction", Some(DmlOperation::Update), RollbackStatus::MissingBackup),
            ("ErrorCondition", Some(DmlOperation::Delete), RollbackStatus::Ready),
            ("ProductRule", Some(DmlOperation::Update), RollbackStatus::Ready),
        ]
    );
    assert_eq!(plan.warnings().len(), 1);
}
