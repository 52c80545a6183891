//! Rolling-window download accounting.
//!
//! Every identity owns two entry lists:
//! - the log, recent downloads that may still count against a quota
//! - the archive, entries that aged past [`MAX_WINDOW_DAYS`]
//!
//! There is no stored period boundary. Usage is recomputed from entry dates
//! on every check, so changing a tier's period takes effect immediately.

mod gate;

pub use gate::DownloadGate;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::tiers::{Identity, MAX_WINDOW_DAYS, TierQuotaPolicy, TierTable};

/// One download record inside a log or archive blob.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadLogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// When the file was last downloaded. Unparseable dates read as `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_date",
        deserialize_with = "deserialize_date"
    )]
    pub date: Option<DateTime<Utc>>,

    /// Number of downloads folded into this entry (absent = 1). Numeric
    /// strings are accepted; anything else reads as `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_counter"
    )]
    pub counter: Option<u64>,
}

impl DownloadLogEntry {
    /// A fresh entry for a single download of `file` at `date`.
    pub fn new(file: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            file: Some(file.into()),
            date: Some(date),
            counter: Some(1),
        }
    }

    /// Stored counter, with absent or zero read as one download.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.counter.filter(|c| *c > 0).unwrap_or(1)
    }

    #[must_use]
    pub fn is_for(&self, file: &str) -> bool {
        self.file.as_deref() == Some(file)
    }
}

fn serialize_date<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match date {
        Some(d) => serializer.serialize_str(&d.to_rfc3339()),
        None => serializer.serialize_none(),
    }
}

/// Parse a stored date string: RFC 3339, `YYYY-MM-DD HH:MM:SS` or a bare
/// `YYYY-MM-DD` (midnight UTC).
#[must_use]
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let trimmed = input.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(d.and_utc());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct DateVisitor;

    impl Visitor<'_> for DateVisitor {
        type Value = Option<DateTime<Utc>>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a date string or unix timestamp")
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(i64::try_from(v)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(DateTime::from_timestamp(v, 0))
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(parse_date(v))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(DateVisitor)
}

fn deserialize_counter<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct CounterVisitor;

    impl Visitor<'_> for CounterVisitor {
        type Value = Option<u64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a download count as integer or numeric string")
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(u64::try_from(v).ok())
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
            Ok((v.is_finite() && v >= 0.0).then(|| v as u64))
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.trim().parse().ok())
        }

        fn visit_bool<E>(self, _: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(CounterVisitor)
}

/// Download statistics for one identity under its current policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadUsage {
    /// Downloads permitted in the current window
    pub allowed: u32,
    /// Window length in days
    pub allowed_days: u32,
    /// Log entries dated inside the window
    pub currently: u32,
    pub log: Vec<DownloadLogEntry>,
    pub archive: Vec<DownloadLogEntry>,
}

impl DownloadUsage {
    /// The fail-closed result for an unknown identity.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Downloads still available in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.allowed.saturating_sub(self.currently)
    }

    /// Verdict for one more download.
    #[must_use]
    pub fn check(&self) -> DownloadCheck {
        if self.allowed == 0 {
            DownloadCheck::NotPermitted
        } else if self.currently >= self.allowed {
            DownloadCheck::QuotaExhausted
        } else {
            DownloadCheck::Allowed
        }
    }
}

/// Result of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadCheck {
    /// Download is within quota
    Allowed,

    /// The identity's tier allows no downloads (or it is not logged in)
    NotPermitted,

    /// Quota for the current window is used up
    QuotaExhausted,
}

impl DownloadCheck {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }
}

/// Count log entries inside `policy`'s window ending at `now`.
///
/// Only the log is scanned. An entry counts when its date is at or after
/// the window start, it names a file, and that file is not `exclude_file`.
/// With no policy the window is empty-width and allowed values are zero.
#[must_use]
pub fn compute_usage(
    policy: Option<&TierQuotaPolicy>,
    log: Vec<DownloadLogEntry>,
    archive: Vec<DownloadLogEntry>,
    exclude_file: Option<&str>,
    now: DateTime<Utc>,
) -> DownloadUsage {
    let (allowed, allowed_days) = policy
        .map(|p| (p.downloads_allowed, p.window_days()))
        .unwrap_or((0, 0));
    let window_start = now - Duration::days(i64::from(allowed_days));

    let currently = log
        .iter()
        .filter(|e| e.date.is_some_and(|d| d >= window_start))
        .filter(|e| {
            e.file
                .as_deref()
                .is_some_and(|f| exclude_file != Some(f))
        })
        .count();

    DownloadUsage {
        allowed,
        allowed_days,
        currently: u32::try_from(currently).unwrap_or(u32::MAX),
        log,
        archive,
    }
}

/// Select the policy for `identity` and compute its usage.
///
/// An unresolved identity yields [`DownloadUsage::zero`].
#[must_use]
pub fn user_downloads(
    identity: Option<&dyn Identity>,
    tiers: &TierTable,
    exclude_file: Option<&str>,
    log: Vec<DownloadLogEntry>,
    archive: Vec<DownloadLogEntry>,
    now: DateTime<Utc>,
) -> DownloadUsage {
    let Some(identity) = identity.filter(|i| i.is_resolved()) else {
        return DownloadUsage::zero();
    };
    let policy = tiers.select_policy(identity);
    compute_usage(policy.as_ref(), log, archive, exclude_file, now)
}

/// Append a download of `file` to `log`, rotating stale entries first.
///
/// Entries older than [`MAX_WINDOW_DAYS`], or without a readable date, can
/// never count toward any quota and move to `archive`. A file already in the
/// log has its counter bumped and its date refreshed instead of gaining a
/// second entry. Returns how many entries were rotated.
pub fn record_download(
    log: &mut Vec<DownloadLogEntry>,
    archive: &mut Vec<DownloadLogEntry>,
    file: &str,
    now: DateTime<Utc>,
) -> usize {
    let cutoff = now - Duration::days(i64::from(MAX_WINDOW_DAYS));
    let (live, stale): (Vec<_>, Vec<_>) = std::mem::take(log)
        .into_iter()
        .partition(|e| e.date.is_some_and(|d| d >= cutoff));
    *log = live;
    let rotated = stale.len();
    for entry in stale {
        archive_entry(archive, entry);
    }

    if let Some(existing) = log.iter_mut().find(|e| e.is_for(file)) {
        existing.counter = Some(existing.count().saturating_add(1));
        existing.date = Some(now);
    } else {
        log.push(DownloadLogEntry::new(file, now));
    }
    rotated
}

/// Move `entry` into `archive`, folding it into an existing entry for the
/// same file.
fn archive_entry(archive: &mut Vec<DownloadLogEntry>, entry: DownloadLogEntry) {
    let existing = entry
        .file
        .as_deref()
        .and_then(|f| archive.iter_mut().find(|a| a.is_for(f)));
    match existing {
        Some(a) => {
            a.counter = Some(a.count().saturating_add(entry.count()));
            a.date = a.date.max(entry.date);
        }
        None => archive.push(entry),
    }
}
