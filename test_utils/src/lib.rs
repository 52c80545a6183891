use chrono::{DateTime, Duration, Utc};
use dlgate::key::KeyDeriver;
use dlgate::quota::{DownloadGate, DownloadLogEntry};
use dlgate::store::{DynStore, sqlite::SqliteStore};
use dlgate::tiers::{Member, TierTable};
use std::sync::Arc;

pub const TEST_SECRET: &str = "test-secret-key";

/// A member holding every tier from 0 up to `tier`.
pub fn member(id: i64, tier: u32) -> Member {
    Member::new(id, tier)
}

/// Tier table with no downloads at tier 0, then 5/30, 10/30, 20/60, 50/365.
pub fn tier_table() -> TierTable {
    TierTable::new([(0, 0), (5, 30), (10, 30), (20, 60), (50, 365)])
}

/// Fresh in-memory SQLite store with its schema applied.
pub async fn memory_store() -> DynStore {
    Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap())
}

/// Gate over a fresh in-memory store and [`tier_table`].
pub async fn gate() -> DownloadGate {
    gate_with(tier_table()).await
}

pub async fn gate_with(tiers: TierTable) -> DownloadGate {
    DownloadGate::new(
        Arc::new(tiers),
        memory_store().await,
        KeyDeriver::new(TEST_SECRET),
        5,
    )
}

/// Log entry for `file` downloaded `days_ago` days before `now`.
pub fn entry(file: &str, days_ago: i64, now: DateTime<Utc>) -> DownloadLogEntry {
    DownloadLogEntry::new(file, now - Duration::days(days_ago))
}

/// Log entry with an explicit counter.
pub fn counted(file: &str, counter: u64, days_ago: i64, now: DateTime<Utc>) -> DownloadLogEntry {
    DownloadLogEntry {
        counter: Some(counter),
        ..entry(file, days_ago, now)
    }
}

/// Serialize entries the way the store persists them.
pub fn blob(entries: &[DownloadLogEntry]) -> String {
    dlgate::store::common::encode_entries(entries).unwrap()
}
