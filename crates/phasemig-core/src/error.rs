//! Core error types.

use thiserror::Error;

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration store error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed key spec.
    #[error("key spec error: {0}")]
    KeySpec(#[from] KeySpecError),

    /// Inconsistent relationship catalog.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Configuration cannot be used for the requested operation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Backup metadata error.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// Named configuration does not exist.
    #[error("configuration not found: {0}")]
    NotFound(String),
}

/// Errors raised while parsing a key spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeySpecError {
    /// The spec text has no segments.
    #[error("key spec is empty")]
    Empty,

    /// A `;`-separated segment is blank.
    #[error("segment {index} of key spec '{spec}' is empty")]
    EmptySegment {
        /// The full spec text.
        spec: String,
        /// Zero-based segment index.
        index: usize,
    },

    /// A traversal segment has a blank hop or field, e.g. `Rule.` or `.Name`.
    #[error("invalid relationship path '{segment}'")]
    InvalidPath {
        /// The offending segment text.
        segment: String,
    },
}

/// Catalog consistency errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Phase number is declared twice.
    #[error("phase {0} is declared more than once")]
    DuplicatePhase(u32),

    /// One or more catalog entries failed validation.
    #[error("catalog is inconsistent: {}", problems.join("; "))]
    Inconsistent {
        /// Every problem found, in declaration order.
        problems: Vec<String>,
    },
}

/// Configuration errors, surfaced before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No source connection is set.
    #[error("configuration '{0}' has no source org")]
    MissingSourceOrg(String),

    /// No target connection is set.
    #[error("configuration '{0}' has no target org")]
    MissingTargetOrg(String),

    /// The phase is not part of the catalog.
    #[error("phase {0} is not defined in the catalog")]
    UnknownPhase(u32),

    /// Every object of the phase was excluded.
    #[error("phase {0} has no objects to migrate")]
    NoPhaseObjects(u32),

    /// The object is not part of the phase.
    #[error("object '{object}' is not part of phase {phase}")]
    UnknownObject {
        /// Phase number.
        phase: u32,
        /// Object name.
        object: String,
    },
}

/// Errors reported by a child-record fetch, scoped to one child object type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The collaborator rejected or failed the query.
    #[error("query for {object} failed: {reason}")]
    Query {
        /// Child object name.
        object: String,
        /// Collaborator-supplied reason.
        reason: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("query for {0} timed out")]
    TimedOut(String),

    /// The fetch task was dropped before answering.
    #[error("fetch task for {0} was cancelled")]
    Cancelled(String),
}

/// Backup metadata errors.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The backup directory does not contain a metadata document.
    #[error("no backup metadata in {0}")]
    MissingMetadata(std::path::PathBuf),

    /// The metadata document could not be decoded.
    #[error("invalid backup metadata in {path}: {source}")]
    InvalidMetadata {
        /// Path to the metadata document.
        path: std::path::PathBuf,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem error while reading or writing backups.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The rollback engine reported a failure.
    #[error("rollback engine error: {0}")]
    Engine(String),
}
