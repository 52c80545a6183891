//! Download gate: the entry point used by access checks and reports.
//!
//! The gate ties together the tier table, the key deriver and the download
//! store. It holds no accounting state of its own; every check reads fresh
//! history from the store. The only in-memory state is a per-identity write
//! lock so that two downloads by the same member in this process never race
//! on the log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{DownloadLogEntry, DownloadUsage, user_downloads};
use crate::aggregate::{DownloadTotals, aggregate};
use crate::error::GateError;
use crate::key::{Directive, DownloadKey, KeyDeriver, RequestContext};
use crate::store::DynStore;
use crate::tiers::{Identity, TierTable};

pub struct DownloadGate {
    tiers: Arc<TierTable>,
    store: DynStore,
    keys: KeyDeriver,

    /// Attempts allowed for one optimistic log append
    write_retries: u32,

    /// Per-identity write locks: identity id -> lock
    /// Arc so the lock can be cloned out before awaiting on it
    writers: DashMap<i64, Arc<Mutex<()>>>,
}

impl DownloadGate {
    pub fn new(tiers: Arc<TierTable>, store: DynStore, keys: KeyDeriver, write_retries: u32) -> Self {
        Self {
            tiers,
            store,
            keys,
            write_retries,
            writers: DashMap::new(),
        }
    }

    #[must_use]
    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    #[must_use]
    pub fn store(&self) -> &DynStore {
        &self.store
    }

    /// Derive the download key for `file`. See [`KeyDeriver::derive`].
    #[must_use]
    pub fn file_download_key(
        &self,
        file: &str,
        directive: Directive,
        ctx: &RequestContext,
    ) -> Option<DownloadKey> {
        self.keys.derive(file, directive, ctx)
    }

    /// Quota and usage for `identity`, reading its history from the store.
    ///
    /// A log that cannot be read yields the zero result so the check fails
    /// closed. An unreadable archive is logged and treated as empty, since
    /// archived entries sit outside every quota window.
    #[tracing::instrument(skip_all)]
    pub async fn user_downloads(
        &self,
        identity: Option<&dyn Identity>,
        exclude_file: Option<&str>,
        now: DateTime<Utc>,
    ) -> DownloadUsage {
        let Some(identity) = identity.filter(|i| i.is_resolved()) else {
            return DownloadUsage::zero();
        };
        let id = identity.id();

        let log = match self.store.get_log(id).await {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(identity_id = id, error = %e, "Failed to load download log");
                return DownloadUsage::zero();
            }
        };
        let archive = self.store.get_archive(id).await.unwrap_or_else(|e| {
            tracing::warn!(identity_id = id, error = %e, "Ignoring unreadable download archive");
            Vec::new()
        });
        user_downloads(Some(identity), &self.tiers, exclude_file, log, archive, now)
    }

    /// Quota and usage for `identity` from a log and archive the caller
    /// already holds.
    #[must_use]
    pub fn user_downloads_with(
        &self,
        identity: Option<&dyn Identity>,
        exclude_file: Option<&str>,
        log: Vec<DownloadLogEntry>,
        archive: Vec<DownloadLogEntry>,
        now: DateTime<Utc>,
    ) -> DownloadUsage {
        user_downloads(identity, &self.tiers, exclude_file, log, archive, now)
    }

    /// Record a served download of `file` for `identity_id`.
    ///
    /// Writes for one identity are serialized in this process; writers in
    /// other processes are caught by the store's version check.
    #[tracing::instrument(skip_all, fields(identity_id = identity_id, file = file))]
    pub async fn record_download(
        &self,
        identity_id: i64,
        file: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GateError> {
        if identity_id <= 0 || file.is_empty() {
            tracing::debug!("Skipping download record without identity or file");
            return Ok(());
        }

        // Clone the Arc out so the DashMap shard is not held across await
        let lock = self
            .writers
            .entry(identity_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        let result = self
            .store
            .append_log_entry(identity_id, file, now, self.write_retries)
            .await;

        drop(guard);
        // Drop the entry once no other writer holds a clone
        self.writers
            .remove_if(&identity_id, |_, l| Arc::strong_count(l) <= 2);

        result?;
        tracing::debug!("Recorded download");
        Ok(())
    }

    /// Total and unique downloads of `file`, optionally for one identity.
    pub async fn aggregate(
        &self,
        file: &str,
        identity_id: Option<i64>,
        include_archive: bool,
    ) -> DownloadTotals {
        aggregate(self.store.as_ref(), file, identity_id, include_archive).await
    }

    /// Sum of download counters for `file`.
    pub async fn total_downloads_of(
        &self,
        file: &str,
        identity_id: Option<i64>,
        include_archive: bool,
    ) -> u64 {
        self.aggregate(file, identity_id, include_archive).await.total
    }

    /// Number of records that contain `file`.
    pub async fn total_unique_downloads_of(
        &self,
        file: &str,
        identity_id: Option<i64>,
        include_archive: bool,
    ) -> u64 {
        self.aggregate(file, identity_id, include_archive).await.unique
    }
}

impl std::fmt::Debug for DownloadGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadGate")
            .field("max_tier", &self.tiers.max_tier())
            .field("write_retries", &self.write_retries)
            .field("active_writers", &self.writers.len())
            .finish()
    }
}
