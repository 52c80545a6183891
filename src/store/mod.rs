//! Per-identity download log and archive persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::StoreError;
use crate::quota::DownloadLogEntry;

/// Which of an identity's two blobs a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Log,
    Archive,
}

impl RecordKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Log => "log",
            RecordKind::Archive => "archive",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(RecordKind::Log),
            "archive" | "arc" => Ok(RecordKind::Archive),
            other => Err(StoreError::InvalidKind(other.to_string())),
        }
    }
}

/// A persisted blob as returned by [`DownloadStore::scan`]. The blob is
/// left undecoded; callers must tolerate malformed contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub identity_id: i64,
    pub kind: RecordKind,
    pub blob: String,
}

/// Restricts a [`DownloadStore::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    /// Only records whose blob may mention this file are returned.
    pub file: String,
    pub identity_id: Option<i64>,
    pub include_archive: bool,
}

impl ScanFilter {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            identity_id: None,
            include_archive: true,
        }
    }

    /// `LIKE` pattern matching any blob containing the file as a JSON
    /// string. Coarse: matches are verified after decoding.
    #[must_use]
    pub fn like_pattern(&self) -> String {
        let quoted = serde_json::to_string(&self.file).unwrap_or_default();
        let mut pattern = String::with_capacity(quoted.len() + 2);
        pattern.push('%');
        for c in quoted.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        pattern
    }
}

pub type RecordStream<'a> = Pin<Box<dyn Stream<Item = Result<StoredRecord, StoreError>> + Send + 'a>>;

/// Persistence for per-identity download logs and archives.
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Live log entries for an identity, empty when none exist. Entries
    /// that do not decode are skipped; a blob that is not a list at all is
    /// [`StoreError::MalformedRecord`].
    async fn get_log(&self, identity_id: i64) -> Result<Vec<DownloadLogEntry>, StoreError>;

    /// Archived entries for an identity, empty when none exist.
    async fn get_archive(&self, identity_id: i64) -> Result<Vec<DownloadLogEntry>, StoreError>;

    /// Record a download of `file` at `now`, rotating aged entries into the
    /// archive. Concurrent writers for the same identity are detected and
    /// retried up to `max_attempts` times. A log or archive that is not a
    /// list is left untouched and reported as [`StoreError::MalformedRecord`].
    async fn append_log_entry(
        &self,
        identity_id: i64,
        file: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<(), StoreError>;

    /// Store a raw blob, replacing any existing one. JSON is re-serialized
    /// to the spelling [`ScanFilter::like_pattern`] looks for; anything else
    /// is stored as-is.
    async fn put_blob(
        &self,
        identity_id: i64,
        kind: RecordKind,
        blob: &str,
    ) -> Result<(), StoreError>;

    /// Lazily stream every record that may mention `filter.file`.
    fn scan(&self, filter: ScanFilter) -> RecordStream<'_>;
}

pub type DynStore = Arc<dyn DownloadStore>;

pub mod common;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

/// Open a download store from a connection URI.
pub async fn open(uri: &str) -> Result<DynStore, StoreError> {
    if uri.starts_with("sqlite:") {
        Ok(Arc::new(sqlite::SqliteStore::new(uri).await?))
    } else if uri.starts_with("postgres:") {
        #[cfg(feature = "postgres")]
        {
            Ok(Arc::new(postgres::PostgresStore::new(uri).await?))
        }
        #[cfg(not(feature = "postgres"))]
        {
            Err(StoreError::BackendDisabled("postgres"))
        }
    } else {
        Err(StoreError::UnknownBackend(uri.to_string()))
    }
}
