//! Fetch keys, states and responses.

use std::fmt;

use crate::error::FetchError;
use crate::key::Record;

/// Correlation key of a child fetch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchKey {
    /// Phase number.
    pub phase: u32,
    /// Parent object name.
    pub parent_object: String,
    /// Child object name.
    pub child_object: String,
}

impl FetchKey {
    /// Create a key.
    pub fn new(
        phase: u32,
        parent_object: impl Into<String>,
        child_object: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            parent_object: parent_object.into(),
            child_object: child_object.into(),
        }
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}",
            self.phase, self.parent_object, self.child_object
        )
    }
}

/// Lifecycle of one fetch key.
///
/// `Idle → Requested → (Fulfilled | TimedOut | Failed)`; a new request
/// moves any state back to `Requested` with a fresh generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FetchState {
    /// Never requested.
    #[default]
    Idle,
    /// Waiting for the response of this generation.
    Requested {
        /// Generation of the outstanding request.
        generation: u64,
    },
    /// Response applied.
    Fulfilled {
        /// Records received.
        records: usize,
    },
    /// The fetch exceeded its timeout.
    TimedOut,
    /// The collaborator reported an error.
    Failed(String),
}

impl FetchState {
    /// Whether a response is outstanding.
    pub fn is_pending(&self) -> bool {
        matches!(self, FetchState::Requested { .. })
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchState::Idle => write!(f, "idle"),
            FetchState::Requested { generation } => write!(f, "requested (#{})", generation),
            FetchState::Fulfilled { records } => write!(f, "fulfilled ({} records)", records),
            FetchState::TimedOut => write!(f, "timed out"),
            FetchState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Answer to one child object of a request.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Cell the response belongs to.
    pub key: FetchKey,
    /// Generation of the request it answers.
    pub generation: u64,
    /// Parents named by the request.
    pub parent_external_ids: Vec<String>,
    /// Fetched records or the fetch error.
    pub result: Result<Vec<Record>, FetchError>,
}
