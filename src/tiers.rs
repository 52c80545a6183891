//! Membership tiers and quota policy selection.
//!
//! The tier table is built once from configuration and shared read-only.
//! Membership itself lives elsewhere; callers hand in anything implementing
//! [`Identity`].

use std::ops::ControlFlow;

use smallvec::SmallVec;

/// Upper bound on any rolling download window, in days.
///
/// Also the age at which log entries rotate into the archive.
pub const MAX_WINDOW_DAYS: u32 = 365;

/// Download quota for one membership tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierQuotaPolicy {
    pub tier: u32,
    /// Downloads permitted per window (0 = downloads disallowed)
    pub downloads_allowed: u32,
    /// Window length in days
    pub allowed_days: u32,
}

impl TierQuotaPolicy {
    /// A tier has quotas only when both the count and the period are set.
    #[must_use]
    pub fn has_quota(&self) -> bool {
        self.downloads_allowed > 0 && self.allowed_days > 0
    }

    /// Window length in days, never above [`MAX_WINDOW_DAYS`].
    #[must_use]
    pub fn window_days(&self) -> u32 {
        self.allowed_days.min(MAX_WINDOW_DAYS)
    }
}

/// Immutable per-tier quota table indexed by tier id `0..=max_tier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    policies: Vec<TierQuotaPolicy>,
}

impl TierTable {
    /// Build a table from `(downloads_allowed, allowed_days)` rows, one per
    /// tier in ascending order. Periods above the global cap are clamped.
    #[must_use]
    pub fn new(rows: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let policies = rows
            .into_iter()
            .enumerate()
            .map(|(n, (downloads_allowed, allowed_days))| {
                let tier = u32::try_from(n).unwrap_or(u32::MAX);
                if allowed_days > MAX_WINDOW_DAYS {
                    tracing::warn!(
                        tier,
                        allowed_days,
                        cap = MAX_WINDOW_DAYS,
                        "Clamping download period to the global cap"
                    );
                }
                TierQuotaPolicy {
                    tier,
                    downloads_allowed,
                    allowed_days: allowed_days.min(MAX_WINDOW_DAYS),
                }
            })
            .collect();
        Self { policies }
    }

    /// Highest tier id in the table, or `None` for an empty table.
    #[must_use]
    pub fn max_tier(&self) -> Option<u32> {
        self.policies.last().map(|p| p.tier)
    }

    #[must_use]
    pub fn get(&self, tier: u32) -> Option<&TierQuotaPolicy> {
        self.policies.get(usize::try_from(tier).ok()?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TierQuotaPolicy> {
        self.policies.iter()
    }

    /// Lowest tier that has quotas configured.
    #[must_use]
    pub fn min_tier_for_downloads(&self) -> Option<u32> {
        self.policies.iter().find(|p| p.has_quota()).map(|p| p.tier)
    }

    /// Longest download period across tiers with quotas, capped at
    /// [`MAX_WINDOW_DAYS`]. Zero means no tier allows downloads.
    #[must_use]
    pub fn max_download_period(&self) -> u32 {
        self.policies
            .iter()
            .filter(|p| p.has_quota())
            .map(TierQuotaPolicy::window_days)
            .max()
            .unwrap_or(0)
    }

    /// Pick the quota policy that applies to `identity`.
    ///
    /// Tiers are visited in ascending order. Every accessible tier with
    /// quotas replaces the running candidate, and the walk stops at the
    /// identity's own assigned tier whether or not that tier has quotas.
    /// An assigned tier without quotas therefore falls back to the highest
    /// lower tier that had them.
    #[must_use]
    pub fn select_policy(&self, identity: &dyn Identity) -> Option<TierQuotaPolicy> {
        let assigned = identity.assigned_tier();
        let walk = self.policies.iter().try_fold(None, |best: Option<TierQuotaPolicy>, policy| {
            if !identity.has_tier(policy.tier) {
                return ControlFlow::Continue(best);
            }
            let best = if policy.has_quota() { Some(*policy) } else { best };
            if policy.tier == assigned {
                ControlFlow::Break(best)
            } else {
                ControlFlow::Continue(best)
            }
        });
        match walk {
            ControlFlow::Continue(best) | ControlFlow::Break(best) => best,
        }
    }
}

/// A requesting identity as seen by the gate.
///
/// `id` values of zero or below mean "not logged in".
pub trait Identity: Send + Sync {
    fn id(&self) -> i64;

    /// The identity's own tier, the most specific one it holds.
    fn assigned_tier(&self) -> u32;

    /// Every tier the identity can access, ascending.
    fn tiers(&self) -> &[u32];

    fn has_tier(&self, tier: u32) -> bool {
        self.tiers().contains(&tier)
    }

    fn is_resolved(&self) -> bool {
        self.id() > 0
    }
}

/// Plain [`Identity`] value for callers that resolve membership themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: i64,
    pub assigned_tier: u32,
    pub tiers: SmallVec<[u32; 4]>,
}

impl Member {
    /// A member of `assigned_tier` with access to every tier up to it.
    #[must_use]
    pub fn new(id: i64, assigned_tier: u32) -> Self {
        Self {
            id,
            assigned_tier,
            tiers: (0..=assigned_tier).collect(),
        }
    }

    /// A member with an explicit access list. The assigned tier is always
    /// included.
    #[must_use]
    pub fn with_tiers(id: i64, assigned_tier: u32, tiers: impl IntoIterator<Item = u32>) -> Self {
        let mut tiers: SmallVec<[u32; 4]> = tiers.into_iter().collect();
        tiers.push(assigned_tier);
        tiers.sort_unstable();
        tiers.dedup();
        Self {
            id,
            assigned_tier,
            tiers,
        }
    }
}

impl Identity for Member {
    fn id(&self) -> i64 {
        self.id
    }

    fn assigned_tier(&self) -> u32 {
        self.assigned_tier
    }

    fn tiers(&self) -> &[u32] {
        &self.tiers
    }
}
