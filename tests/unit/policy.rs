use dlgate::tiers::{Identity, MAX_WINDOW_DAYS, Member, TierTable};
use test_utils::{member, tier_table};

#[test]
fn own_tier_policy_is_authoritative() {
    let table = tier_table();
    for tier in 1..=4 {
        let policy = table.select_policy(&member(7, tier)).unwrap();
        assert_eq!(policy.tier, tier);
    }
}

#[test]
fn assigned_tier_without_quota_falls_back_to_last_lower_match() {
    // 0: none, 1: 5/30, 2: none
    let table = TierTable::new([(0, 0), (5, 30), (0, 0)]);
    let policy = table.select_policy(&member(7, 2)).unwrap();
    assert_eq!(policy.tier, 1);
    assert_eq!(policy.downloads_allowed, 5);
    assert_eq!(policy.allowed_days, 30);
}

#[test]
fn last_match_wins_over_first() {
    // 0: none, 1: 5/30, 2: 10/60, 3: none
    let table = TierTable::new([(0, 0), (5, 30), (10, 60), (0, 0)]);
    let policy = table.select_policy(&member(7, 3)).unwrap();
    assert_eq!(policy.tier, 2);
}

#[test]
fn walk_stops_at_assigned_tier() {
    // Access to tier 3 is granted but the walk ends at the assigned tier 1
    let table = TierTable::new([(0, 0), (5, 30), (0, 0), (50, 90)]);
    let m = Member::with_tiers(7, 1, [0, 3]);
    assert!(m.has_tier(3));
    assert_eq!(table.select_policy(&m).unwrap().tier, 1);
}

#[test]
fn inaccessible_tiers_are_skipped() {
    let table = TierTable::new([(0, 0), (5, 30), (10, 60), (0, 0)]);
    let m = Member::with_tiers(7, 3, [1]);
    assert_eq!(table.select_policy(&m).unwrap().tier, 1);
}

#[test]
fn no_matching_quota_is_no_policy() {
    let table = TierTable::new([(0, 0), (0, 30), (5, 0)]);
    assert!(table.select_policy(&member(7, 2)).is_none());

    let unknown_tier = Member::with_tiers(7, 9, []);
    assert!(tier_table().select_policy(&unknown_tier).is_none());
}

#[test]
fn windows_never_exceed_cap() {
    let table = TierTable::new([(1, 0), (1, 364), (1, 365), (1, 366), (1, u32::MAX)]);
    assert!(table.iter().all(|p| p.window_days() <= MAX_WINDOW_DAYS));
    assert!(table.iter().all(|p| p.allowed_days <= MAX_WINDOW_DAYS));
    assert_eq!(table.max_download_period(), MAX_WINDOW_DAYS);
}
