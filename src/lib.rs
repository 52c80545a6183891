//! Download access keys and per-tier rolling download quotas.
//!
//! A membership site hands out [`key::DownloadKey`]s instead of raw file
//! URLs, limits each member to a number of downloads per rolling window
//! according to their tier, and reports how often a file has been fetched.
//! [`quota::DownloadGate`] ties the pieces together over a
//! [`store::DownloadStore`].

pub mod aggregate;
pub mod config;
pub mod error;
pub mod key;
pub mod migrations;
pub mod prelude;
pub mod quota;
pub mod store;
pub mod tiers;

use std::sync::Arc;

use config::Config;
use error::GateError;
use quota::DownloadGate;

/// Open the configured store and build a gate around it.
///
/// # Errors
///
/// Returns an error if the tier table or secret is invalid, or the store
/// cannot be opened.
pub async fn gate_from_config(cfg: &Config) -> Result<DownloadGate, GateError> {
    let tiers = Arc::new(cfg.tier_table()?);
    let keys = cfg.key_deriver()?;
    let store = store::open(&cfg.db_path).await?;
    tracing::info!(
        max_tier = cfg.max_tier,
        min_tier_for_downloads = ?tiers.min_tier_for_downloads(),
        max_download_period = tiers.max_download_period(),
        "Download gate ready"
    );
    Ok(DownloadGate::new(tiers, store, keys, cfg.write_retries))
}
