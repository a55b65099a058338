//! Configuration loading and management
//!
//! Handles parsing of the `tasks-plan.toml` settings file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default lifetime of the task snapshot cache
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);
/// Default time a finished create stays deduplicated
pub const DEFAULT_DEDUP_GRACE: Duration = Duration::from_secs(5);
/// Page size requested when loading every task fragment
pub const DEFAULT_LIST_LIMIT: u32 = 200;

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub dedup: DedupConfig,
}

/// Remote fragment store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the Usable API
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    "https://usable.dev".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// OAuth token endpoint used for refreshes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// How long before expiry a proactive refresh fires (e.g., "30s")
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin: String,
}

fn default_token_url() -> String {
    "https://auth.flowcore.io/realms/memory-mesh/protocol/openid-connect/token".to_string()
}

fn default_client_id() -> String {
    "mcp_oauth_client".to_string()
}

fn default_refresh_margin() -> String {
    "30s".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            client_id: default_client_id(),
            refresh_margin: default_refresh_margin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Snapshot lifetime (e.g., "2m")
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,

    /// Page size for the full task listing
    #[serde(default = "default_list_limit")]
    pub list_limit: u32,
}

fn default_cache_ttl() -> String {
    "2m".to_string()
}

fn default_list_limit() -> u32 {
    DEFAULT_LIST_LIMIT
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            list_limit: default_list_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How long a completed create keeps absorbing duplicates (e.g., "5s")
    #[serde(default = "default_dedup_grace")]
    pub grace: String,
}

fn default_dedup_grace() -> String {
    "5s".to_string()
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            grace: default_dedup_grace(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file is missing or
    /// invalid.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(path) if path.exists() => match Self::load(path) {
                Ok(settings) => settings,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring invalid settings");
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        crate::lock::write_atomic(path, content.as_bytes())
    }

    pub fn cache_ttl(&self) -> Duration {
        parse_duration(&self.cache.ttl).unwrap_or(DEFAULT_CACHE_TTL)
    }

    pub fn dedup_grace(&self) -> Duration {
        parse_duration(&self.dedup.grace).unwrap_or(DEFAULT_DEDUP_GRACE)
    }

    pub fn refresh_margin(&self) -> Duration {
        parse_duration(&self.auth.refresh_margin).unwrap_or(Duration::from_secs(30))
    }

    fn validate(&self) -> Result<()> {
        validate_url(&self.api.base_url, "api.base_url")?;
        validate_url(&self.auth.token_url, "auth.token_url")?;
        if self.auth.client_id.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "auth.client_id cannot be empty".to_string(),
            ));
        }
        validate_duration(&self.auth.refresh_margin, "auth.refresh_margin")?;
        validate_duration(&self.cache.ttl, "cache.ttl")?;
        validate_duration(&self.dedup.grace, "dedup.grace")?;
        if self.cache.list_limit < crate::remote::MIN_PAGE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "cache.list_limit must be >= {}",
                crate::remote::MIN_PAGE_SIZE
            )));
        }
        Ok(())
    }
}

fn validate_url(raw: &str, field: &str) -> Result<()> {
    url::Url::parse(raw)
        .map(|_| ())
        .map_err(|err| Error::InvalidConfig(format!("{field}: invalid URL '{raw}': {err}")))
}

fn validate_duration(raw: &str, field: &str) -> Result<()> {
    parse_duration(raw)
        .map(|_| ())
        .map_err(|err| Error::InvalidConfig(format!("{field}: {err}")))
}

/// Parse a duration like `30s`, `2m`, `1h`, `7d`, `2w`. Bare numbers are
/// minutes.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, "m"),
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid duration number: {num_str}")))?;

    let seconds_per_unit = match unit.to_lowercase().as_str() {
        "s" | "sec" | "second" | "seconds" => 1,
        "m" | "min" | "minute" | "minutes" => 60,
        "h" | "hr" | "hour" | "hours" => 60 * 60,
        "d" | "day" | "days" => 24 * 60 * 60,
        "w" | "week" | "weeks" => 7 * 24 * 60 * 60,
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{unit}'. Expected: s, m, h, d, w"
            )));
        }
    };

    Ok(Duration::from_secs(num.saturating_mul(seconds_per_unit)))
}
