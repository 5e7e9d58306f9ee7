//! phasemig core - phase catalog, natural-key resolution, selection and rollback planning.
//!
//! This crate provides the engine behind phased record migrations: which
//! objects each phase covers, how child records are bundled with selected
//! master records through stable natural keys, and how completed backups map
//! to rollback operations.

pub mod backup;
pub mod catalog;
pub mod config;
pub mod error;
pub mod key;
pub mod resolver;
pub mod selection;
pub mod store;

pub use backup::{
    BackupEntry, BackupIndex, BackupMetadata, BackupObject, DmlOperation, RollbackExecutor,
    RollbackObject, RollbackPlan, RollbackPlanner, RollbackReport, RollbackStatus,
};
pub use catalog::{PhaseDefinition, PhaseEntry, RelationshipCatalog, RelationshipEdge};
pub use config::{MigrationConfig, PhasePlan, PlannedObject};
pub use error::{BackupError, CatalogError, ConfigError, Error, FetchError, KeySpecError};
pub use key::{KeySegment, KeySpec, Record};
pub use resolver::{
    ApplyReport, ChildConfig, ChildFetchRequest, ChildFetcher, ChildRecordResolver, FetchKey,
    FetchResponse, FetchState, ResolverConfig,
};
pub use selection::{
    KeyMatcher, MatchRule, MergeOutcome, QueriedChildRecords, SelectionEntry, SelectionStore,
};
pub use store::{ConfigStore, StoredConfig};
