//! Domain error types for the download gate
//!
//! Business conditions (missing file, unknown member, undecodable entries)
//! never surface here; they degrade to empty or zero results. These errors
//! cover infrastructure failures, caller contract violations, and stored
//! records too damaged to rewrite safely.

use thiserror::Error;

use crate::store::RecordKind;

/// Top-level error type
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Download log for identity {identity_id} still contended after {attempts} attempts")]
    Contention { identity_id: i64, attempts: u32 },

    #[error("Unknown store backend: {0}")]
    UnknownBackend(String),

    #[error("Store backend not enabled: {0}")]
    BackendDisabled(&'static str),

    #[error("Invalid record kind: {0}")]
    InvalidKind(String),

    #[error("Download {kind} for identity {identity_id} is not a list of entries: {reason}")]
    MalformedRecord {
        identity_id: i64,
        kind: RecordKind,
        reason: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(Box::new(e))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Tier {0} is configured more than once")]
    DuplicateTier(u32),

    #[error("Tier {tier} is above max_tier {max_tier}")]
    TierOutOfRange { tier: u32, max_tier: u32 },

    #[error("Placeholder expansion failed: {0}")]
    Placeholder(String),
}

impl GateError {
    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::Store(StoreError::Contention { .. }) | GateError::Store(StoreError::Database(_))
        )
    }
}
