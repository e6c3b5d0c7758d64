//! Configuration file parser for feedwarden.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning for each one
//! since they are usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::guard::GuardConfig;
use crate::ratelimit::RateLimiterConfig;
use crate::scheduler::SchedulerConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// Every section uses `#[serde(default)]` so any subset of keys can be
/// given. Numeric settings that are zero or negative select the built-in
/// default when converted into component configs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Relative paths resolve against the working directory.
    pub database_path: String,

    /// User-Agent header sent with every feed request.
    pub user_agent: String,

    pub rate_limit: RateLimiterConfig,

    pub scheduler: SchedulerSection,

    pub guard: GuardSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "feedwarden.db".to_string(),
            user_agent: concat!("feedwarden/", env!("CARGO_PKG_VERSION")).to_string(),
            rate_limit: RateLimiterConfig::default(),
            scheduler: SchedulerSection::default(),
            guard: GuardSection::default(),
        }
    }
}

/// `[scheduler]` table. Durations are in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub update_window_secs: i64,
    pub min_interval_secs: i64,
    pub max_concurrent: i64,
    pub cleanup_interval_secs: i64,
}

/// `[guard]` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GuardSection {
    pub dns_timeout_secs: i64,
    /// Permit loopback feed URLs. Local development only.
    pub allow_loopback: bool,
}

const KNOWN_KEYS: &[&str] = &["database_path", "user_agent", "rate_limit", "scheduler", "guard"];
const KNOWN_SECTION_KEYS: &[(&str, &[&str])] = &[
    ("rate_limit", &["requests_per_minute", "burst_size"]),
    (
        "scheduler",
        &[
            "update_window_secs",
            "min_interval_secs",
            "max_concurrent",
            "cleanup_interval_secs",
        ],
    ),
    ("guard", &["dns_timeout_secs", "allow_loopback"]),
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never loaded
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        self.rate_limit.normalized()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::from_secs(
            self.scheduler.update_window_secs,
            self.scheduler.min_interval_secs,
            self.scheduler.max_concurrent,
            self.scheduler.cleanup_interval_secs,
        )
    }

    pub fn guard_config(&self) -> GuardConfig {
        let dns_timeout = match u64::try_from(self.guard.dns_timeout_secs) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => GuardConfig::DEFAULT_DNS_TIMEOUT,
        };
        GuardConfig {
            dns_timeout,
            allow_loopback: self.guard.allow_loopback,
        }
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for (key, value) in raw {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            continue;
        }
        let (Some(table), Some((_, known))) = (
            value.as_table(),
            KNOWN_SECTION_KEYS.iter().find(|(section, _)| *section == key.as_str()),
        ) else {
            continue;
        };
        for sub in table.keys() {
            if !known.contains(&sub.as_str()) {
                tracing::warn!(key = %format!("{key}.{sub}"), "Unknown key in config file, ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
