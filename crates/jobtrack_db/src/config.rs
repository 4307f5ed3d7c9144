//! Job store configuration.

use crate::error::{Result, StoreError};

const IN_MEMORY_URL: &str = "sqlite::memory:";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Environment variable holding the SQLite connection URL.
pub const ENV_DATABASE_URL: &str = "JOBTRACK_DATABASE_URL";
/// Optional pool size override.
pub const ENV_MAX_CONNECTIONS: &str = "JOBTRACK_MAX_CONNECTIONS";
/// Dev-only toggle that permits [`JobStore::reset`](crate::JobStore::reset).
pub const ENV_ALLOW_RESET: &str = "JOBTRACK_ALLOW_RESET";

/// Job store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite connection URL
    pub url: String,
    /// Maximum connections in the pool
    pub max_connections: u32,
    /// Whether destructive resets are permitted against this target
    pub allow_reset: bool,
}

impl StoreConfig {
    /// File-backed SQLite configuration. The file is created if missing.
    pub fn sqlite(path: impl AsRef<str>) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path.as_ref()),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            allow_reset: false,
        }
    }

    /// In-memory SQLite configuration (for tests).
    ///
    /// Every connection to `:memory:` is its own database, so the pool is
    /// pinned to a single connection.
    pub fn sqlite_memory() -> Self {
        Self {
            url: IN_MEMORY_URL.to_string(),
            max_connections: 1,
            allow_reset: true,
        }
    }

    /// Configuration from a `sqlite:` URL.
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if !url.starts_with("sqlite:") {
            return Err(StoreError::config(format!(
                "unsupported database URL (expected sqlite:...): {url}"
            )));
        }
        if url == IN_MEMORY_URL {
            return Ok(Self::sqlite_memory());
        }
        Ok(Self {
            url,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            allow_reset: false,
        })
    }

    /// Configuration from `JOBTRACK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_DATABASE_URL)
            .map_err(|_| StoreError::config(format!("{ENV_DATABASE_URL} is not set")))?;
        let mut config = Self::from_url(url)?;

        if let Ok(raw) = std::env::var(ENV_MAX_CONNECTIONS) {
            let max = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    StoreError::config(format!("{ENV_MAX_CONNECTIONS} must be a positive integer, got {raw:?}"))
                })?;
            config = config.with_max_connections(max);
        }

        if let Ok(raw) = std::env::var(ENV_ALLOW_RESET) {
            config = config.with_allow_reset(parse_flag(&raw));
        }

        Ok(config)
    }

    /// Set maximum connections. Ignored for in-memory targets.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        if !self.is_memory() {
            self.max_connections = max;
        }
        self
    }

    /// Permit or forbid destructive resets.
    pub fn with_allow_reset(mut self, allow: bool) -> Self {
        self.allow_reset = allow;
        self
    }

    pub fn is_memory(&self) -> bool {
        self.url == IN_MEMORY_URL
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}
