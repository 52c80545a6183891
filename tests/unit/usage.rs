use chrono::{Duration, Utc};
use dlgate::quota::{DownloadCheck, DownloadLogEntry, DownloadUsage, compute_usage, user_downloads};
use dlgate::tiers::{Identity, Member, TierQuotaPolicy};
use test_utils::{entry, member, tier_table};

fn policy(downloads_allowed: u32, allowed_days: u32) -> TierQuotaPolicy {
    TierQuotaPolicy {
        tier: 1,
        downloads_allowed,
        allowed_days,
    }
}

#[test]
fn window_boundary_is_inclusive() {
    let now = Utc::now();
    let log = vec![entry("edge.zip", 30, now), entry("out.zip", 31, now)];
    let usage = compute_usage(Some(&policy(5, 30)), log, Vec::new(), None, now);
    assert_eq!(usage.currently, 1);
    assert_eq!(usage.allowed, 5);
    assert_eq!(usage.allowed_days, 30);
}

#[test]
fn one_second_past_the_window_is_out() {
    let now = Utc::now();
    let log = vec![DownloadLogEntry::new(
        "a.zip",
        now - Duration::days(30) - Duration::seconds(1),
    )];
    let usage = compute_usage(Some(&policy(5, 30)), log, Vec::new(), None, now);
    assert_eq!(usage.currently, 0);
}

#[test]
fn excluded_file_never_counts() {
    let now = Utc::now();
    let log = vec![
        entry("a.zip", 1, now),
        entry("b.zip", 2, now),
        entry("a.zip", 0, now),
    ];
    let usage = compute_usage(Some(&policy(5, 30)), log, Vec::new(), Some("a.zip"), now);
    assert_eq!(usage.currently, 1);
    assert_eq!(usage.log.len(), 3);
}

#[test]
fn entries_without_file_or_date_do_not_count() {
    let now = Utc::now();
    let log = vec![
        DownloadLogEntry {
            file: None,
            date: Some(now),
            counter: None,
        },
        DownloadLogEntry {
            file: Some("a.zip".into()),
            date: None,
            counter: None,
        },
        entry("b.zip", 0, now),
    ];
    let usage = compute_usage(Some(&policy(5, 30)), log, Vec::new(), None, now);
    assert_eq!(usage.currently, 1);
}

#[test]
fn archive_is_returned_but_not_counted() {
    let now = Utc::now();
    let archive = vec![entry("old.zip", 1, now)];
    let usage = compute_usage(Some(&policy(5, 30)), Vec::new(), archive, None, now);
    assert_eq!(usage.currently, 0);
    assert_eq!(usage.archive.len(), 1);
}

#[test]
fn unresolved_identity_is_zero() {
    let now = Utc::now();
    let table = tier_table();
    let log = vec![entry("a.zip", 0, now)];

    let none = user_downloads(None, &table, None, log.clone(), log.clone(), now);
    assert_eq!(none, DownloadUsage::zero());

    let anonymous = Member::new(0, 4);
    let usage = user_downloads(
        Some(&anonymous as &dyn Identity),
        &table,
        None,
        log.clone(),
        log,
        now,
    );
    assert_eq!(usage, DownloadUsage::zero());
    assert!(usage.log.is_empty() && usage.archive.is_empty());
    assert_eq!(usage.check(), DownloadCheck::NotPermitted);
}

#[test]
fn member_usage_uses_selected_policy() {
    let now = Utc::now();
    let log = vec![
        entry("a.zip", 1, now),
        entry("b.zip", 40, now),
        entry("c.zip", 59, now),
    ];
    let m = member(7, 3);
    let usage = user_downloads(Some(&m as &dyn Identity), &tier_table(), None, log, Vec::new(), now);
    assert_eq!(usage.allowed, 20);
    assert_eq!(usage.allowed_days, 60);
    assert_eq!(usage.currently, 3);
    assert_eq!(usage.remaining(), 17);
    assert!(usage.check().is_allowed());
}

#[test]
fn exhausted_quota_is_denied() {
    let now = Utc::now();
    let log = (0..5).map(|i| entry(&format!("{i}.zip"), i, now)).collect();
    let m = member(7, 1);
    let usage = user_downloads(Some(&m as &dyn Identity), &tier_table(), None, log, Vec::new(), now);
    assert_eq!(usage.currently, 5);
    assert_eq!(usage.check(), DownloadCheck::QuotaExhausted);

    // Re-fetching a file already served does not need more quota
    let log = (0..5).map(|i| entry(&format!("{i}.zip"), i, now)).collect();
    let usage = user_downloads(
        Some(&m as &dyn Identity),
        &tier_table(),
        Some("0.zip"),
        log,
        Vec::new(),
        now,
    );
    assert!(usage.check().is_allowed());
}

#[test]
fn tier_without_downloads_is_not_permitted() {
    let now = Utc::now();
    let m = member(7, 0);
    let usage = user_downloads(Some(&m as &dyn Identity), &tier_table(), None, Vec::new(), Vec::new(), now);
    assert_eq!(usage.allowed, 0);
    assert_eq!(usage.check(), DownloadCheck::NotPermitted);
}
