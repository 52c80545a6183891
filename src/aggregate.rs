//! Historical download totals for a file.
//!
//! There is no per-file ledger. Totals come from scanning every identity's
//! log (and optionally archive) blob: the store applies a coarse text match,
//! then each candidate blob is decoded and checked for an entry whose file
//! is exactly the one asked about. Only the first such entry in a blob
//! counts. Undecodable entries and blobs are skipped so a single bad record
//! never spoils a report.

use futures_util::StreamExt;
use serde::Serialize;

use crate::quota::DownloadLogEntry;
use crate::store::common::parse_blob;
use crate::store::{DownloadStore, ScanFilter, StoredRecord};

/// Aggregated download counts for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadTotals {
    /// Sum of counters, one matching entry per record
    pub total: u64,
    /// Number of records containing the file
    pub unique: u64,
}

/// Counter of the first entry in `blob` for `file`, if any. Entries that do
/// not decode are passed over; only a blob that is not a list is an error.
pub fn first_match(blob: &str, file: &str) -> Result<Option<u64>, serde_json::Error> {
    Ok(parse_blob(blob)?
        .entries
        .iter()
        .find(|e| e.is_for(file))
        .map(DownloadLogEntry::count))
}

/// Scan `store` for downloads of `file`.
///
/// Returns zero totals for an empty file. Store errors end the scan early
/// with whatever was counted so far.
pub async fn aggregate(
    store: &dyn DownloadStore,
    file: &str,
    identity_id: Option<i64>,
    include_archive: bool,
) -> DownloadTotals {
    let mut totals = DownloadTotals::default();
    if file.is_empty() {
        return totals;
    }

    let filter = ScanFilter {
        file: file.to_string(),
        identity_id,
        include_archive,
    };
    let mut records = store.scan(filter);
    while let Some(record) = records.next().await {
        match record {
            Ok(StoredRecord {
                identity_id,
                kind,
                blob,
            }) => match first_match(&blob, file) {
                Ok(Some(counter)) => {
                    totals.total = totals.total.saturating_add(counter);
                    totals.unique += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(identity_id, %kind, error = %e, "Skipping malformed download record");
                }
            },
            Err(crate::error::StoreError::InvalidKind(kind)) => {
                tracing::warn!(kind = %kind, "Skipping download record of unknown kind");
            }
            Err(e) => {
                tracing::warn!(file, error = %e, "Download scan aborted; totals are partial");
                break;
            }
        }
    }

    tracing::debug!(file, total = totals.total, unique = totals.unique, "Aggregated downloads");
    totals
}
