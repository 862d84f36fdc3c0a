// src/error.rs

use crate::resolver::ConflictError;
use thiserror::Error;

/// Core error types for llamapkg
#[derive(Error, Debug)]
pub enum Error {
    /// Version text that does not follow MAJOR.MINOR.PATCH[-PRE]
    #[error("Invalid version format: {0}")]
    InvalidVersionFormat(String),

    /// Constraint text that cannot be parsed
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    /// Package or version unknown to the registry or the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requirements that cannot all be satisfied
    #[error("{0}")]
    Conflict(Box<ConflictError>),

    /// Cycle among required dependency edges
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// Removal refused because other packages still need the target
    #[error("Cannot remove {package}: still required by {}", .required_by.join(", "))]
    RequiredBy {
        package: String,
        required_by: Vec<String>,
    },

    /// Transport or registry failure (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Digest mismatch or missing digest (never retried)
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Persisted store fails its consistency check
    #[error("Store corruption: {0}")]
    StoreCorruption(String),

    /// ChangeSet planned against a store generation that is no longer current
    #[error("Stale changeset {id}: planned against generation {planned}, store is at {current}")]
    StaleChangeSet {
        id: String,
        planned: u64,
        current: u64,
    },

    /// Exclusive store lock could not be acquired
    #[error("Lock error: {0}")]
    Lock(String),

    /// Operation cancelled by the caller
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Rollback of a partially committed change failed
    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    /// Registry refused a publish request
    #[error("Publish rejected: {0}")]
    Publish(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Artifact could not be staged
    #[error("Unpack error: {0}")]
    Unpack(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether a failed operation may be retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<ConflictError> for Error {
    fn from(conflict: ConflictError) -> Self {
        Self::Conflict(Box::new(conflict))
    }
}

/// Result type alias using llamapkg's Error type
pub type Result<T> = std::result::Result<T, Error>;
