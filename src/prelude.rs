//! Prelude module that provides common imports
//!
//! Import as `use dlgate::prelude::*` where the common types are needed.

// Re-export anyhow::Result as the standard Result type for the binary and tools
pub use anyhow::Result;

pub use crate::aggregate::DownloadTotals;
pub use crate::config::Config;
pub use crate::error::{ConfigError, GateError, StoreError};
pub use crate::key::{Directive, DownloadKey, KeyDeriver, RequestContext};
pub use crate::quota::{DownloadCheck, DownloadGate, DownloadLogEntry, DownloadUsage};
pub use crate::store::{DownloadStore, DynStore, RecordKind};
pub use crate::tiers::{Identity, Member, TierQuotaPolicy, TierTable};
