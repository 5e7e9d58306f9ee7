//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use phasemig_core::resolver::{ResolverConfig, DEFAULT_COUNT_TIMEOUT, DEFAULT_FETCH_TIMEOUT};
use phasemig_core::DmlOperation;

use crate::formatter::OutputFormat;

/// Default directory of the configuration database.
pub const DEFAULT_DATA_PATH: &str = "./data";

/// Default directory holding backups, one subdirectory per configuration.
pub const DEFAULT_BACKUP_ROOT: &str = "./backups";

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Configuration database directory.
    pub data_path: PathBuf,

    /// Catalog file; the built-in catalog when unset.
    pub catalog_path: Option<PathBuf>,

    /// Backup root directory.
    pub backup_root: PathBuf,

    /// Output format.
    pub format: OutputFormat,

    /// Child resolver settings.
    pub resolver: ResolverConfig,
}

impl CliConfig {
    /// Create a configuration with the given data path.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            catalog_path: None,
            backup_root: PathBuf::from(DEFAULT_BACKUP_ROOT),
            format: OutputFormat::Table,
            resolver: ResolverConfig::default(),
        }
    }

    /// Load the catalog from a file.
    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Set the backup root.
    pub fn with_backup_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_root = path.into();
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the resolver settings.
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_PATH)
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "phasemig")]
#[command(version, about = "Plan phased record migrations by natural key", long_about = None)]
pub struct Args {
    /// Configuration database directory.
    #[arg(short, long, global = true, default_value = DEFAULT_DATA_PATH)]
    pub data_path: PathBuf,

    /// Relationship catalog JSON file (defaults to the built-in catalog).
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Backup root directory.
    #[arg(long, global = true, default_value = DEFAULT_BACKUP_ROOT)]
    pub backup_root: PathBuf,

    /// Output format.
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Child fetch timeout in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs())]
    pub fetch_timeout: u64,

    /// Record count timeout in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_COUNT_TIMEOUT.as_secs())]
    pub count_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Split the arguments into the shared configuration and the command.
    pub fn into_config(self) -> (CliConfig, Command) {
        let resolver = ResolverConfig::new()
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout))
            .with_count_timeout(Duration::from_secs(self.count_timeout));

        let config = CliConfig {
            data_path: self.data_path,
            catalog_path: self.catalog,
            backup_root: self.backup_root,
            format: self.format,
            resolver,
        };
        (config, self.command)
    }
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the catalog phases.
    Phases {
        /// Include derived (child) objects.
        #[arg(long)]
        include_derived: bool,
    },

    /// Check the catalog for inconsistencies.
    ValidateCatalog,

    /// Manage migration configurations.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Select records of an object.
    Select {
        /// Configuration name.
        config: String,
        /// Phase number.
        phase: u32,
        /// Object name.
        object: String,
        /// Natural keys to select.
        #[arg(required = true)]
        external_ids: Vec<String>,
        /// Internal id of the record (single natural key only).
        #[arg(long)]
        id: Option<String>,
    },

    /// Deselect a record and the children bundled with it.
    Deselect {
        /// Configuration name.
        config: String,
        /// Phase number.
        phase: u32,
        /// Object name.
        object: String,
        /// Natural key to deselect.
        external_id: String,
    },

    /// Fetch the children of selected records from an offline export.
    FetchChildren {
        /// Configuration name.
        config: String,
        /// Phase number.
        phase: u32,
        /// Parent object; every master of the phase when omitted.
        #[arg(long)]
        parent: Option<String>,
        /// Directory with one `<Object>.json` record array per object.
        #[arg(long, required_unless_present = "cached")]
        export_dir: Option<PathBuf>,
        /// Re-merge cached children instead of fetching.
        #[arg(long)]
        cached: bool,
    },

    /// Show selection counts per phase and object.
    Status {
        /// Configuration name.
        config: String,
        /// Only this phase.
        #[arg(long)]
        phase: Option<u32>,
        /// Also count exported records per object.
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },

    /// Print the plan the migration engine consumes for a phase.
    Plan {
        /// Configuration name.
        config: String,
        /// Phase number.
        phase: u32,
    },

    /// List backups of a configuration.
    Backups {
        /// Configuration name.
        config: String,
        /// Only this phase.
        #[arg(long)]
        phase: Option<u32>,
    },

    /// Compute the rollback plan for a backup.
    RollbackPlan {
        /// Configuration name.
        config: String,
        /// Phase number.
        phase: u32,
        /// Backup directory name; the latest backup of the phase when omitted.
        #[arg(long)]
        backup: Option<String>,
    },
}

/// `config` subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Create a configuration.
    Create {
        /// Configuration name.
        name: String,
        /// Source connection alias.
        #[arg(long)]
        source: Option<String>,
        /// Target connection alias.
        #[arg(long)]
        target: Option<String>,
    },

    /// Show a configuration document.
    Show {
        /// Configuration name.
        name: String,
    },

    /// List configurations.
    List,

    /// Delete a configuration.
    Delete {
        /// Configuration name.
        name: String,
    },

    /// Exclude an object from a phase.
    Exclude {
        /// Configuration name.
        name: String,
        /// Phase number.
        phase: u32,
        /// Object name.
        object: String,
    },

    /// Include a previously excluded object.
    Include {
        /// Configuration name.
        name: String,
        /// Phase number.
        phase: u32,
        /// Object name.
        object: String,
    },

    /// Set the operation of a phase.
    SetOperation {
        /// Configuration name.
        name: String,
        /// Phase number.
        phase: u32,
        /// Operation (insert, update, upsert, delete, ...).
        operation: DmlOperation,
    },

    /// Mark a phase as migrated.
    Complete {
        /// Configuration name.
        name: String,
        /// Phase number.
        phase: u32,
    },
}
