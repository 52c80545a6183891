use crate::error::ConfigError;
use crate::key::KeyDeriver;
use crate::tiers::TierTable;
use regex::Regex;
use serde::Deserialize;
use std::str::FromStr;

fn default_db_path() -> String {
    "sqlite:///var/lib/dlgate/downloads.db".into()
}

fn default_max_tier() -> u32 {
    4
}

fn default_write_retries() -> u32 {
    5
}

/// Highest `max_tier` accepted; tier tables are small and dense.
const TIER_LIMIT: u32 = 1024;

/// Replace every match of `re` using `lookup`, failing on the first error.
fn replace_all(
    re: &Regex,
    text: &str,
    lookup: impl Fn(&str) -> Result<String, ConfigError>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let (Some(m), Some(arg)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&text[last..m.start()]);
        out.push_str(&lookup(arg.as_str())?);
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn expand_placeholders(text: &str) -> Result<String, ConfigError> {
    let env_re = Regex::new(r"\$ENV\{([^}]+)\}").map_err(|e| ConfigError::Placeholder(e.to_string()))?;
    let file_re =
        Regex::new(r"\$FILE\{([^}]+)\}").map_err(|e| ConfigError::Placeholder(e.to_string()))?;

    let text = replace_all(&env_re, text, |name| {
        std::env::var(name).map_err(|e| ConfigError::Placeholder(format!("$ENV{{{name}}}: {e}")))
    })?;
    replace_all(&file_re, &text, |path| {
        std::fs::read_to_string(path)
            .map(|s| s.trim_end_matches(['\r', '\n']).to_string())
            .map_err(|e| ConfigError::Placeholder(format!("$FILE{{{path}}}: {e}")))
    })
}

#[derive(Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_max_tier")]
    pub max_tier: u32,
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default)]
    pub tiers: Vec<TierRule>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TierRule {
    pub tier: u32,
    #[serde(default)]
    pub downloads_allowed: u32,
    #[serde(default)]
    pub allowed_days: u32,
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

impl Config {
    /// Load configuration from a TOML file, expanding `$ENV{..}` and
    /// `$FILE{..}` placeholders first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// resolved or the TOML is invalid.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_string()),
            _ => ConfigError::Invalid(format!("{path}: {e}")),
        })?;
        expand_placeholders(&text)?.parse()
    }

    /// Build the tier table for tiers `0..=max_tier`.
    ///
    /// Tiers without a `[[tiers]]` entry allow no downloads.
    ///
    /// # Errors
    ///
    /// Returns an error for a tier listed twice or above `max_tier`, or an
    /// unreasonably large `max_tier`.
    pub fn tier_table(&self) -> Result<TierTable, ConfigError> {
        if self.max_tier > TIER_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_tier {} exceeds {TIER_LIMIT}",
                self.max_tier
            )));
        }
        let mut rows: Vec<Option<(u32, u32)>> = vec![None; self.max_tier as usize + 1];
        for rule in &self.tiers {
            let slot = rows
                .get_mut(rule.tier as usize)
                .ok_or(ConfigError::TierOutOfRange {
                    tier: rule.tier,
                    max_tier: self.max_tier,
                })?;
            if slot.is_some() {
                return Err(ConfigError::DuplicateTier(rule.tier));
            }
            *slot = Some((rule.downloads_allowed, rule.allowed_days));
        }
        Ok(TierTable::new(rows.into_iter().map(Option::unwrap_or_default)))
    }

    /// Build the key deriver from `secret_key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the secret is empty.
    pub fn key_deriver(&self) -> Result<KeyDeriver, ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::MissingField("secret_key"));
        }
        Ok(KeyDeriver::new(self.secret_key.as_bytes()))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_path", &self.db_path)
            .field("secret_key", &"<redacted>")
            .field("max_tier", &self.max_tier)
            .field("write_retries", &self.write_retries)
            .field("tiers", &self.tiers)
            .finish()
    }
}
