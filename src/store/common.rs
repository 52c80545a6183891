use chrono::{DateTime, Utc};
use serde_json::Value;
use std::borrow::Cow;
use std::time::Duration;

use super::RecordKind;
use crate::error::StoreError;
use crate::quota::{DownloadLogEntry, record_download};

/// A stored blob split into the entries that decoded and the raw array
/// elements that did not.
#[derive(Debug, Default)]
pub struct DecodedBlob {
    pub entries: Vec<DownloadLogEntry>,
    pub undecodable: Vec<Value>,
}

/// Decode a blob entry by entry.
///
/// Fails only when the blob is not a JSON array. Elements that are not
/// valid entries are kept raw in [`DecodedBlob::undecodable`].
pub fn parse_blob(blob: &str) -> Result<DecodedBlob, serde_json::Error> {
    let elements: Vec<Value> = serde_json::from_str(blob)?;
    let mut decoded = DecodedBlob::default();
    for element in elements {
        match serde_json::from_value::<DownloadLogEntry>(element.clone()) {
            Ok(entry) => decoded.entries.push(entry),
            Err(_) => decoded.undecodable.push(element),
        }
    }
    Ok(decoded)
}

fn decode_blob(identity_id: i64, kind: RecordKind, blob: &str) -> Result<DecodedBlob, StoreError> {
    let decoded = parse_blob(blob).map_err(|e| {
        tracing::warn!(identity_id, %kind, error = %e, "Download record is not a list of entries");
        StoreError::MalformedRecord {
            identity_id,
            kind,
            reason: e.to_string(),
        }
    })?;
    if !decoded.undecodable.is_empty() {
        tracing::warn!(
            identity_id,
            %kind,
            skipped = decoded.undecodable.len(),
            "Skipping undecodable download entries"
        );
    }
    Ok(decoded)
}

/// Decode the entries of a stored blob, skipping any that do not decode.
pub fn decode_entries(
    identity_id: i64,
    kind: RecordKind,
    blob: &str,
) -> Result<Vec<DownloadLogEntry>, StoreError> {
    Ok(decode_blob(identity_id, kind, blob)?.entries)
}

pub fn encode_entries(entries: &[DownloadLogEntry]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(entries)?)
}

/// Encode entries followed by the raw elements that did not decode.
fn encode_blob(decoded: &DecodedBlob) -> Result<String, StoreError> {
    if decoded.undecodable.is_empty() {
        return encode_entries(&decoded.entries);
    }
    let mut elements = decoded
        .entries
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    elements.extend(decoded.undecodable.iter().cloned());
    Ok(serde_json::to_string(&elements)?)
}

/// Re-serialize a JSON blob so every string has one spelling, the one
/// [`super::ScanFilter::like_pattern`] searches for. Text that is not JSON
/// is returned unchanged.
pub fn canonical_blob(blob: &str) -> Cow<'_, str> {
    match serde_json::from_str::<Value>(blob).and_then(|v| serde_json::to_string(&v)) {
        Ok(canonical) => Cow::Owned(canonical),
        Err(_) => Cow::Borrowed(blob),
    }
}

/// Apply one download to the current blobs.
///
/// Returns the new log blob, and the new archive blob when rotation
/// changed the archive. Undecodable entries are carried over untouched. A
/// blob that is not a list of entries is never overwritten; the download
/// fails with [`StoreError::MalformedRecord`] instead.
pub fn apply_download(
    identity_id: i64,
    log_blob: Option<&str>,
    archive_blob: Option<&str>,
    file: &str,
    now: DateTime<Utc>,
) -> Result<(String, Option<String>), StoreError> {
    let mut log = log_blob
        .map(|b| decode_blob(identity_id, RecordKind::Log, b))
        .transpose()?
        .unwrap_or_default();
    let mut archive = archive_blob
        .map(|b| decode_blob(identity_id, RecordKind::Archive, b))
        .transpose()?
        .unwrap_or_default();
    let rotated = record_download(&mut log.entries, &mut archive.entries, file, now);
    let archive = if rotated > 0 {
        Some(encode_blob(&archive)?)
    } else {
        None
    };
    Ok((encode_blob(&log)?, archive))
}

/// Pause before retrying a contended append.
pub async fn contention_backoff(attempt: u32) {
    let millis = 5u64.saturating_mul(1 << attempt.min(6));
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
