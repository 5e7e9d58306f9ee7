//! Backups and rollback planning.
//!
//! Every completed backup leaves a [`BackupMetadata`] document describing,
//! per migrated object, the operation performed and the snapshots taken.
//! [`BackupIndex`] finds those documents per phase and object, and
//! [`RollbackPlanner`] turns one into the inverse operation plan:
//!
//! | Original | Rollback | Snapshot |
//! |----------|----------|----------|
//! | Insert | Delete | post-migration |
//! | Update | Update | pre-migration |
//! | Upsert | Update | pre-migration |
//! | Delete | Insert | pre-migration |
//! | DeleteHierarchy / DeleteSource | none | none |

mod index;
mod metadata;
mod operation;
mod rollback;

pub use index::{backup_dir_name, record_backup, BackupEntry, BackupIndex};
pub use metadata::{BackupMetadata, BackupObject, METADATA_FILE};
pub use operation::{DmlOperation, SnapshotKind};
pub use rollback::{
    ObjectRollbackResult, RollbackExecutor, RollbackObject, RollbackPlan, RollbackPlanner,
    RollbackReport, RollbackStatus,
};
