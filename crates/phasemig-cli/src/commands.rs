//! Command handlers.

use std::sync::Arc;

use phasemig_core::backup::{BackupEntry, BackupIndex};
use phasemig_core::{
    ChildRecordResolver, ConfigError, ConfigStore, FetchState, MigrationConfig,
    RelationshipCatalog, RollbackPlanner, SelectionEntry,
};
use serde::Serialize;
use thiserror::Error;

use crate::config::{CliConfig, Command, ConfigAction};
use crate::export::JsonExportFetcher;
use crate::formatter::{create_formatter, Formatter, OutputFormat};

/// Errors reported by a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Engine error.
    #[error(transparent)]
    Core(#[from] phasemig_core::Error),

    /// The configuration cannot be used for the command.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Backup metadata error.
    #[error(transparent)]
    Backup(#[from] phasemig_core::BackupError),

    /// Configuration database error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The arguments do not make sense together.
    #[error("{0}")]
    Usage(String),
}

/// An open configuration database with its catalog and output formatter.
pub struct Session {
    catalog: RelationshipCatalog,
    store: ConfigStore,
    config: CliConfig,
    formatter: Box<dyn Formatter>,
    _db: sled::Db,
}

impl Session {
    /// Open the database and catalog named by the configuration.
    pub fn open(config: CliConfig) -> Result<Self, CommandError> {
        let db = sled::open(&config.data_path)?;
        Self::with_db(config, db)
    }

    /// Use an already open database.
    pub fn with_db(config: CliConfig, db: sled::Db) -> Result<Self, CommandError> {
        let catalog = match &config.catalog_path {
            Some(path) => RelationshipCatalog::from_json_file(path)?,
            None => RelationshipCatalog::builtin()?,
        };
        let store = ConfigStore::open(&db)?;

        Ok(Self {
            catalog,
            store,
            formatter: create_formatter(config.format),
            config,
            _db: db,
        })
    }

    /// Execute a command and return its rendered output.
    pub async fn execute(&self, command: Command) -> Result<String, CommandError> {
        let output = match command {
            Command::Phases { include_derived } => self.phases(include_derived),
            Command::ValidateCatalog => self.validate_catalog()?,
            Command::Config { action } => self.config_action(action)?,
            Command::Select {
                config,
                phase,
                object,
                external_ids,
                id,
            } => self.select(&config, phase, &object, external_ids, id)?,
            Command::Deselect {
                config,
                phase,
                object,
                external_id,
            } => self.deselect(&config, phase, &object, &external_id)?,
            Command::FetchChildren {
                config,
                phase,
                parent,
                export_dir,
                cached,
            } => {
                if cached {
                    self.load_cached_children(&config, phase)?
                } else {
                    let dir = export_dir.ok_or_else(|| {
                        CommandError::Usage("--export-dir is required unless --cached".to_string())
                    })?;
                    let fetcher = JsonExportFetcher::new(dir);
                    self.fetch_children(&config, phase, parent.as_deref(), fetcher)
                        .await?
                }
            }
            Command::Status {
                config,
                phase,
                export_dir,
            } => self.status(&config, phase, export_dir).await?,
            Command::Plan { config, phase } => self.plan(&config, phase)?,
            Command::Backups { config, phase } => self.backups(&config, phase)?,
            Command::RollbackPlan {
                config,
                phase,
                backup,
            } => self.rollback_plan(&config, phase, backup.as_deref())?,
        };
        self.store.flush()?;
        Ok(output)
    }

    fn phases(&self, include_derived: bool) -> String {
        let rows: Vec<Vec<String>> = self
            .catalog
            .phase_definitions(include_derived)
            .into_iter()
            .map(|p| {
                vec![
                    p.phase_number.to_string(),
                    p.description,
                    p.objects.join(", "),
                ]
            })
            .collect();
        self.formatter
            .format_rows(&["phase", "description", "objects"], &rows)
    }

    fn validate_catalog(&self) -> Result<String, CommandError> {
        self.catalog.validate().map_err(phasemig_core::Error::from)?;
        Ok(self.formatter.format_message(&format!(
            "catalog is consistent ({} phases)",
            self.catalog.phase_numbers().len()
        )))
    }

    fn config_action(&self, action: ConfigAction) -> Result<String, CommandError> {
        match action {
            ConfigAction::Create {
                name,
                source,
                target,
            } => {
                if self.store.contains(&name)? {
                    return Err(CommandError::Usage(format!(
                        "configuration '{}' already exists",
                        name
                    )));
                }
                let mut config = MigrationConfig::new(&name);
                config.source_org = source;
                config.target_org = target;
                self.store.save(&config)?;
                tracing::info!(config = %name, "created configuration");
                Ok(self
                    .formatter
                    .format_message(&format!("created configuration '{}'", name)))
            }
            ConfigAction::Show { name } => {
                let config = self.store.get(&name)?;
                Ok(self.render(&config)?)
            }
            ConfigAction::List => {
                let rows: Vec<Vec<String>> = self
                    .store
                    .list()?
                    .into_iter()
                    .map(|c| {
                        vec![
                            c.name,
                            c.updated_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                        ]
                    })
                    .collect();
                Ok(self.formatter.format_rows(&["name", "updated"], &rows))
            }
            ConfigAction::Delete { name } => {
                if !self.store.delete(&name)? {
                    return Err(phasemig_core::Error::NotFound(name).into());
                }
                Ok(self
                    .formatter
                    .format_message(&format!("deleted configuration '{}'", name)))
            }
            ConfigAction::Exclude {
                name,
                phase,
                object,
            } => self.update(&name, |catalog, config| {
                ensure_phase_object(catalog, phase, &object)?;
                config.exclude_object(phase, object.as_str());
                Ok(format!("excluded {} from phase {}", object, phase))
            }),
            ConfigAction::Include {
                name,
                phase,
                object,
            } => self.update(&name, |catalog, config| {
                ensure_phase_object(catalog, phase, &object)?;
                config.include_object(phase, &object);
                Ok(format!("included {} in phase {}", object, phase))
            }),
            ConfigAction::SetOperation {
                name,
                phase,
                operation,
            } => self.update(&name, |catalog, config| {
                catalog.phase(phase).ok_or(ConfigError::UnknownPhase(phase))?;
                config.phase_operations.insert(phase, operation);
                Ok(format!("phase {} will run {}", phase, operation))
            }),
            ConfigAction::Complete { name, phase } => self.update(&name, |catalog, config| {
                catalog.phase(phase).ok_or(ConfigError::UnknownPhase(phase))?;
                config.mark_phase_completed(phase);
                Ok(format!("phase {} marked as completed", phase))
            }),
        }
    }

    fn select(
        &self,
        name: &str,
        phase: u32,
        object: &str,
        external_ids: Vec<String>,
        id: Option<String>,
    ) -> Result<String, CommandError> {
        if id.is_some() && external_ids.len() > 1 {
            return Err(CommandError::Usage(
                "--id applies to a single natural key".to_string(),
            ));
        }

        self.update(name, |catalog, config| {
            let requested = external_ids.len();
            let mut added = 0;
            for external_id in external_ids {
                let mut entry = SelectionEntry::new(external_id);
                if let Some(id) = &id {
                    entry = entry.with_id(id.clone());
                }
                if config.select(catalog, phase, object, entry)? {
                    added += 1;
                }
            }
            Ok(format!(
                "selected {} of {} {} record(s) in phase {}",
                added, requested, object, phase
            ))
        })
    }

    fn deselect(
        &self,
        name: &str,
        phase: u32,
        object: &str,
        external_id: &str,
    ) -> Result<String, CommandError> {
        self.update(name, |catalog, config| {
            let before = config.selection.selected_count(phase);
            match config.deselect(catalog, phase, object, external_id) {
                Some(_) => {
                    let removed = before - config.selection.selected_count(phase);
                    Ok(format!(
                        "deselected {} '{}' ({} record(s) removed)",
                        object, external_id, removed
                    ))
                }
                None => Ok(format!("{} '{}' was not selected", object, external_id)),
            }
        })
    }

    /// Fetch the children of every selected parent and merge them.
    pub async fn fetch_children(
        &self,
        name: &str,
        phase: u32,
        parent: Option<&str>,
        fetcher: JsonExportFetcher,
    ) -> Result<String, CommandError> {
        let mut config = self.store.get(name)?;
        config.validate_for_phase(&self.catalog, phase)?;

        let parents: Vec<String> = match parent {
            Some(parent) => vec![parent.to_string()],
            None => self
                .catalog
                .selectable_masters_for_phase(phase)
                .into_iter()
                .map(str::to_string)
                .collect(),
        };

        let mut resolver =
            ChildRecordResolver::new(Arc::new(fetcher), self.config.resolver.clone());
        let mut requested = 0;
        for parent in &parents {
            requested += resolver
                .request_children(&self.catalog, &config, phase, parent)?
                .len();
        }

        let reports = resolver.drain(&self.catalog, &mut config).await;
        let added: usize = reports.iter().map(|r| r.merged.added).sum();
        tracing::info!(config = name, phase, requested, added, "fetched children");
        self.store.save(&config)?;

        let rows: Vec<Vec<String>> = resolver
            .states()
            .map(|(key, state)| {
                let selected = config.selection.selected_count_for(phase, &key.child_object);
                vec![
                    key.parent_object.clone(),
                    key.child_object.clone(),
                    state.to_string(),
                    selected.to_string(),
                ]
            })
            .collect();

        let failed = resolver
            .states()
            .filter(|(_, s)| matches!(s, FetchState::Failed(_) | FetchState::TimedOut))
            .count();
        if failed > 0 {
            tracing::warn!(
                config = name,
                phase,
                failed,
                "some child fetches did not complete"
            );
        }

        Ok(self
            .formatter
            .format_rows(&["parent", "child", "state", "selected"], &rows))
    }

    fn load_cached_children(&self, name: &str, phase: u32) -> Result<String, CommandError> {
        let mut config = self.store.get(name)?;
        self.catalog
            .phase(phase)
            .ok_or(ConfigError::UnknownPhase(phase))?;

        let outcome = config.remerge_cached_children(&self.catalog, phase);
        self.store.save(&config)?;

        Ok(self.formatter.format_message(&format!(
            "merged cached children for phase {}: {} added, {} already selected",
            phase, outcome.added, outcome.duplicates
        )))
    }

    async fn status(
        &self,
        name: &str,
        phase: Option<u32>,
        export_dir: Option<std::path::PathBuf>,
    ) -> Result<String, CommandError> {
        let config = self.store.get(name)?;
        let phases = match phase {
            Some(phase) => {
                self.catalog
                    .phase(phase)
                    .ok_or(ConfigError::UnknownPhase(phase))?;
                vec![phase]
            }
            None => self.catalog.phase_numbers(),
        };

        let mut headers = vec!["phase", "object", "selected", "excluded", "completed"];
        let mut rows = Vec::new();

        let resolver = export_dir.map(|dir| {
            headers.push("available");
            ChildRecordResolver::new(
                Arc::new(JsonExportFetcher::new(dir)),
                self.config.resolver.clone(),
            )
        });
        let org = config.source_org.clone().unwrap_or_default();

        for phase in phases {
            let Some(entry) = self.catalog.phase(phase) else {
                continue;
            };
            let objects = entry.all_objects();
            let counts = match &resolver {
                Some(resolver) => Some(resolver.object_counts(&objects, &org).await),
                None => None,
            };

            for (i, object) in objects.iter().enumerate() {
                let mut row = vec![
                    phase.to_string(),
                    object.to_string(),
                    config.selection.selected_count_for(phase, object).to_string(),
                    yes_no(config.is_excluded(phase, object)),
                    yes_no(config.is_phase_completed(phase)),
                ];
                if let Some(counts) = &counts {
                    let available = counts
                        .get(i)
                        .and_then(|(_, c)| *c)
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "?".to_string());
                    row.push(available);
                }
                rows.push(row);
            }
        }

        Ok(self.formatter.format_rows(&headers, &rows))
    }

    fn plan(&self, name: &str, phase: u32) -> Result<String, CommandError> {
        let config = self.store.get(name)?;
        let plan = config.phase_plan(&self.catalog, phase)?;
        tracing::info!(
            config = name,
            phase,
            objects = plan.objects.len(),
            records = plan.record_count(),
            "built phase plan"
        );
        self.render(&plan)
    }

    fn backups(&self, name: &str, phase: Option<u32>) -> Result<String, CommandError> {
        let index = self.backup_index(name)?;
        let entries: Vec<&BackupEntry> = match phase {
            Some(phase) => index.for_phase(phase),
            None => index.entries().iter().collect(),
        };

        let rows: Vec<Vec<String>> = entries
            .into_iter()
            .map(|e| {
                vec![
                    dir_name(e),
                    e.phase_number().map(|p| p.to_string()).unwrap_or_default(),
                    e.metadata.timestamp.to_rfc3339(),
                    e.metadata.objects.len().to_string(),
                ]
            })
            .collect();
        Ok(self
            .formatter
            .format_rows(&["backup", "phase", "timestamp", "objects"], &rows))
    }

    fn rollback_plan(
        &self,
        name: &str,
        phase: u32,
        backup: Option<&str>,
    ) -> Result<String, CommandError> {
        let index = self.backup_index(name)?;
        let entry = match backup {
            Some(backup) => index
                .for_phase(phase)
                .into_iter()
                .find(|e| dir_name(e) == backup),
            None => index.latest_for_phase(phase),
        }
        .ok_or_else(|| {
            CommandError::Usage(format!("no backup of phase {} for '{}'", phase, name))
        })?;

        let plan = RollbackPlanner::new()
            .with_backup_dir(&entry.dir)
            .plan(&entry.metadata);
        for warning in plan.warnings() {
            tracing::warn!(config = name, phase, "{}", warning);
        }

        if self.config.format == OutputFormat::Json {
            return self.render(&plan);
        }

        let rows: Vec<Vec<String>> = plan
            .objects
            .iter()
            .map(|o| {
                vec![
                    o.object_name.clone(),
                    o.original_operation.to_string(),
                    o.rollback_operation
                        .map(|op| op.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    o.status.to_string(),
                    o.backup_file
                        .as_ref()
                        .map(|f| f.display().to_string())
                        .unwrap_or_default(),
                ]
            })
            .collect();
        Ok(self.formatter.format_rows(
            &["object", "migrated", "rollback", "status", "backup file"],
            &rows,
        ))
    }

    fn backup_index(&self, name: &str) -> Result<BackupIndex, CommandError> {
        if !self.store.contains(name)? {
            return Err(phasemig_core::Error::NotFound(name.to_string()).into());
        }
        Ok(BackupIndex::load(&self.config.backup_root, name)?)
    }

    /// Load a configuration, change it and save it back.
    fn update<F>(&self, name: &str, change: F) -> Result<String, CommandError>
    where
        F: FnOnce(&RelationshipCatalog, &mut MigrationConfig) -> Result<String, CommandError>,
    {
        let mut config = self.store.get(name)?;
        let message = change(&self.catalog, &mut config)?;
        self.store.save(&config)?;
        Ok(self.formatter.format_message(&message))
    }

    fn render<T: Serialize>(&self, value: &T) -> Result<String, CommandError> {
        Ok(self
            .formatter
            .format_document(&serde_json::to_value(value)?))
    }
}

fn ensure_phase_object(
    catalog: &RelationshipCatalog,
    phase: u32,
    object: &str,
) -> Result<(), ConfigError> {
    let entry = catalog.phase(phase).ok_or(ConfigError::UnknownPhase(phase))?;
    if !entry.contains(object) {
        return Err(ConfigError::UnknownObject {
            phase,
            object: object.to_string(),
        });
    }
    Ok(())
}

fn dir_name(entry: &BackupEntry) -> String {
    entry
        .dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use phasemig_core::backup::record_backup;
    use phasemig_core::{BackupMetadata, BackupObject, DmlOperation};

    struct TestSession {
        session: Session,
        backups: tempfile::TempDir,
    }

    fn session(format: OutputFormat) -> TestSession {
        let backups = tempfile::tempdir().unwrap();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let config = CliConfig::default()
            .with_format(format)
            .with_backup_root(backups.path());
        TestSession {
            session: Session::with_db(config, db).unwrap(),
            backups,
        }
    }

    fn create(name: &str) -> Command {
        Command::Config {
            action: ConfigAction::Create {
                name: name.to_string(),
                source: Some("dev".to_string()),
                target: Some("uat".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let ctx = session(OutputFormat::Table);
        ctx.session.execute(create("spring")).await.unwrap();

        let err = ctx.session.execute(create("spring")).await.unwrap_err();
        assert!(matches!(err, CommandError::Usage(_)));
    }

    #[tokio::test]
    async fn test_select_and_plan() {
        let ctx = session(OutputFormat::Json);
        ctx.session.execute(create("spring")).await.unwrap();
        ctx.session
            .execute(Command::Select {
                config: "spring".to_string(),
                phase: 2,
                object: "ProductRule".to_string(),
                external_ids: vec!["Discount Rule".to_string(), "Bundle Rule".to_string()],
                id: None,
            })
            .await
            .unwrap();

        let output = ctx
            .session
            .execute(Command::Plan {
                config: "spring".to_string(),
                phase: 2,
            })
            .await
            .unwrap();
        let plan: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(plan["phaseNumber"], 2);
        assert_eq!(plan["objects"][0]["objectName"], "ProductRule");
        assert_eq!(plan["objects"][0]["records"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_select_rejects_id_with_many_keys() {
        let ctx = session(OutputFormat::Table);
        ctx.session.execute(create("spring")).await.unwrap();

        let err = ctx
            .session
            .execute(Command::Select {
                config: "spring".to_string(),
                phase: 2,
                object: "ProductRule".to_string(),
                external_ids: vec!["A".to_string(), "B".to_string()],
                id: Some("a0B1".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Usage(_)));
    }

    #[tokio::test]
    async fn test_exclude_unknown_object() {
        let ctx = session(OutputFormat::Table);
        ctx.session.execute(create("spring")).await.unwrap();

        let err = ctx
            .session
            .execute(Command::Config {
                action: ConfigAction::Exclude {
                    name: "spring".to_string(),
                    phase: 2,
                    object: "Account".to_string(),
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Config(ConfigError::UnknownObject { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_children_from_export() {
        let ctx = session(OutputFormat::Json);
        let export = tempfile::tempdir().unwrap();
        std::fs::write(
            export.path().join("ErrorCondition.json"),
            r#"[{"Id": "e1", "Index": 0, "Rule": {"Name": "Discount Rule"}}]"#,
        )
        .unwrap();
        std::fs::write(export.path().join("ProductAction.json"), "[]").unwrap();

        ctx.session.execute(create("spring")).await.unwrap();
        ctx.session
            .execute(Command::Select {
                config: "spring".to_string(),
                phase: 2,
                object: "ProductRule".to_string(),
                external_ids: vec!["Discount Rule".to_string()],
                id: None,
            })
            .await
            .unwrap();

        let output = ctx
            .session
            .execute(Command::FetchChildren {
                config: "spring".to_string(),
                phase: 2,
                parent: Some("ProductRule".to_string()),
                export_dir: Some(export.path().to_path_buf()),
                cached: false,
            })
            .await
            .unwrap();
        assert!(output.contains("ErrorCondition"));

        let config = ctx.session.store.get("spring").unwrap();
        assert_eq!(
            config.selection.selected_external_ids(2, "ErrorCondition"),
            vec!["Discount Rule|0"]
        );
    }

    #[tokio::test]
    async fn test_cached_reload_keeps_deselected_child_out() {
        let ctx = session(OutputFormat::Table);
        let export = tempfile::tempdir().unwrap();
        std::fs::write(
            export.path().join("ErrorCondition.json"),
            r#"[
                {"Id": "e1", "Index": 0, "Rule": {"Name": "Discount Rule"}},
                {"Id": "e2", "Index": 1, "Rule": {"Name": "Discount Rule"}}
            ]"#,
        )
        .unwrap();

        ctx.session.execute(create("spring")).await.unwrap();
        ctx.session
            .execute(Command::Select {
                config: "spring".to_string(),
                phase: 2,
                object: "ProductRule".to_string(),
                external_ids: vec!["Discount Rule".to_string()],
                id: None,
            })
            .await
            .unwrap();
        ctx.session
            .execute(Command::FetchChildren {
                config: "spring".to_string(),
                phase: 2,
                parent: Some("ProductRule".to_string()),
                export_dir: Some(export.path().to_path_buf()),
                cached: false,
            })
            .await
            .unwrap();
        ctx.session
            .execute(Command::Deselect {
                config: "spring".to_string(),
                phase: 2,
                object: "ErrorCondition".to_string(),
                external_id: "Discount Rule|0".to_string(),
            })
            .await
            .unwrap();

        let output = ctx
            .session
            .execute(Command::FetchChildren {
                config: "spring".to_string(),
                phase: 2,
                parent: None,
                export_dir: None,
                cached: true,
            })
            .await
            .unwrap();
        assert!(output.contains("0 added"));

        let config = ctx.session.store.get("spring").unwrap();
        assert_eq!(
            config.selection.selected_external_ids(2, "ErrorCondition"),
            vec!["Discount Rule|1"]
        );
    }

    #[tokio::test]
    async fn test_cached_reload_unknown_phase() {
        let ctx = session(OutputFormat::Table);
        ctx.session.execute(create("spring")).await.unwrap();

        let err = ctx
            .session
            .execute(Command::FetchChildren {
                config: "spring".to_string(),
                phase: 42,
                parent: None,
                export_dir: None,
                cached: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Config(ConfigError::UnknownPhase(42))
        ));
    }

    #[tokio::test]
    async fn test_missing_config() {
        let ctx = session(OutputFormat::Table);
        let err = ctx
            .session
            .execute(Command::Plan {
                config: "absent".to_string(),
                phase: 2,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Core(phasemig_core::Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_plan_latest_backup() {
        let ctx = session(OutputFormat::Table);
        ctx.session.execute(create("spring")).await.unwrap();

        let metadata = BackupMetadata::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
            .with_phase(2)
            .with_object(BackupObject::new(
                "ProductRule",
                DmlOperation::DeleteSource,
                "Name",
            ));
        record_backup(ctx.backups.path(), "spring", 2, &metadata).unwrap();

        let output = ctx
            .session
            .execute(Command::RollbackPlan {
                config: "spring".to_string(),
                phase: 2,
                backup: None,
            })
            .await
            .unwrap();
        assert!(output.contains("ProductRule"));
        assert!(output.contains("cannot rollback"));

        let err = ctx
            .session
            .execute(Command::RollbackPlan {
                config: "spring".to_string(),
                phase: 3,
                backup: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Usage(_)));
    }
}
