//! Download key derivation.
//!
//! A download key replaces a direct file URL. It is a keyed hash over a salt
//! whose components depend on the [`Directive`]:
//!
//! - default: calendar date, requester IP, user agent and file, so a key is
//!   only good for one visitor on one day
//! - [`Directive::IpForever`]: file and requester IP, never expires
//! - [`Directive::Universal`]: the file alone, reusable by anyone forever
//!
//! Universal keys trade security for cacheability. Rotating the secret
//! invalidates every issued key, which is harmless for default keys (they
//! live at most a day) but breaks any universal key handed out earlier.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Number of digest bytes kept in a key (hex encoded to 32 characters).
const KEY_BYTES: usize = 16;

/// Key derivation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Directive {
    /// Bound to date, IP, user agent and file.
    #[default]
    Default,
    /// Bound to file and IP only.
    IpForever,
    /// Bound to the file only.
    Universal,
}

impl Directive {
    /// Interpret an optional directive string.
    ///
    /// `ip-forever` selects [`Directive::IpForever`]; `universal`,
    /// `cache-compatible` and any other non-empty value select
    /// [`Directive::Universal`].
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Directive::Default,
            Some("ip-forever") => Directive::IpForever,
            Some(_) => Directive::Universal,
        }
    }

    /// Whether keys minted with this directive can be shared and cached.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Directive::Universal)
    }
}

impl FromStr for Directive {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Directive::parse(Some(s)))
    }
}

/// Requester details mixed into identity-bound keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: String,
    pub today: NaiveDate,
}

impl RequestContext {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
            today,
        }
    }
}

/// A derived download key: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadKey(String);

impl DownloadKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a key presented by a client without short-circuiting.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let a = self.0.as_bytes();
        let b = candidate.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives download keys with a process-wide secret.
#[derive(Clone)]
pub struct KeyDeriver {
    secret: Vec<u8>,
}

impl KeyDeriver {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Derive the key for `file` under `directive`.
    ///
    /// Returns `None` when `file` is empty once surrounding slashes are
    /// trimmed; a missing key is itself a deny signal.
    #[must_use]
    pub fn derive(
        &self,
        file: &str,
        directive: Directive,
        ctx: &RequestContext,
    ) -> Option<DownloadKey> {
        let salt = salt_for(file, directive, ctx)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(salt.as_bytes());
        let digest = mac.finalize().into_bytes();
        Some(DownloadKey(hex::encode(&digest[..KEY_BYTES])))
    }
}

impl fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDeriver")
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn salt_for(file: &str, directive: Directive, ctx: &RequestContext) -> Option<String> {
    let file = file.trim_matches('/');
    if file.is_empty() {
        return None;
    }
    let salt = match directive {
        Directive::IpForever => format!("{file}{}", ctx.ip),
        Directive::Universal => file.to_string(),
        Directive::Default => format!(
            "{}{}{}{file}",
            ctx.today.format("%Y-%m-%d"),
            ctx.ip,
            ctx.user_agent
        ),
    };
    Some(salt)
}
