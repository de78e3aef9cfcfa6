//! Configuration types

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of entries the in-process cache holds.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1000;

/// Default per-operation timeout for networked cache backends.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(10);

const PROJECT_ID_VAR: &str = "DATASTORE_PROJECT_ID";
const MAX_CACHE_SIZE_VAR: &str = "DSCACHE_MAX_CACHE_SIZE";
const CACHE_SERVERS_VAR: &str = "DSCACHE_CACHE_SERVERS";
const CACHE_TIMEOUT_VAR: &str = "DSCACHE_CACHE_TIMEOUT_SECS";

/// Caching client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DscacheConfig {
    /// Project the remote store belongs to.
    pub project_id: String,
    /// Entry limit of the in-process cache (ignored by networked backends).
    pub max_cache_size: usize,
    /// `host:port` addresses of networked cache servers. Empty selects the
    /// in-process cache.
    pub cache_servers: Vec<String>,
    /// Timeout applied to each networked cache operation.
    pub cache_timeout: Duration,
}

impl DscacheConfig {
    /// Configuration with defaults for everything but the project.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            cache_servers: Vec::new(),
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
        }
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `DATASTORE_PROJECT_ID`: Project used when `project_id` is empty
    /// - `DSCACHE_MAX_CACHE_SIZE`: In-process cache entry limit (default: 1000)
    /// - `DSCACHE_CACHE_SERVERS`: Comma-separated `host:port` list (default: none)
    /// - `DSCACHE_CACHE_TIMEOUT_SECS`: Networked cache timeout (default: 10)
    ///
    /// A value that is present but malformed is an error rather than a silent
    /// fallback.
    pub fn from_env(project_id: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(project_id, |name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(project_id: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_id = if project_id.is_empty() {
            lookup(PROJECT_ID_VAR)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: PROJECT_ID_VAR.to_string(),
                })?
        } else {
            project_id.to_string()
        };

        let mut config = Self::new(project_id);

        if let Some(raw) = lookup(MAX_CACHE_SIZE_VAR) {
            config.max_cache_size = raw
                .trim()
                .parse()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: MAX_CACHE_SIZE_VAR.to_string(),
                    value: raw.clone(),
                    reason: "must be a positive integer".to_string(),
                })?;
        }

        if let Some(raw) = lookup(CACHE_SERVERS_VAR) {
            config.cache_servers = parse_server_list(&raw);
        }

        if let Some(raw) = lookup(CACHE_TIMEOUT_VAR) {
            let secs: u64 = raw
                .trim()
                .parse()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: CACHE_TIMEOUT_VAR.to_string(),
                    value: raw.clone(),
                    reason: "must be a positive number of seconds".to_string(),
                })?;
            config.cache_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_max_cache_size(mut self, max_cache_size: usize) -> Self {
        self.max_cache_size = max_cache_size;
        self
    }

    pub fn with_cache_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_servers = servers
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn with_cache_timeout(mut self, cache_timeout: Duration) -> Self {
        self.cache_timeout = cache_timeout;
        self
    }

    /// Whether a networked cache is configured.
    pub fn uses_cache_servers(&self) -> bool {
        !self.cache_servers.is_empty()
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - project_id is not empty
    /// - max_cache_size > 0
    /// - cache_timeout is positive
    /// - every cache server address has the `host:port` form
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "project_id".to_string(),
            });
        }

        if self.max_cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_cache_size".to_string(),
                value: "0".to_string(),
                reason: "max_cache_size must be greater than 0".to_string(),
            });
        }

        if self.cache_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cache_timeout".to_string(),
                value: format!("{:?}", self.cache_timeout),
                reason: "cache_timeout must be positive".to_string(),
            });
        }

        for server in &self.cache_servers {
            let valid = server
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidValue {
                    field: "cache_servers".to_string(),
                    value: server.clone(),
                    reason: "expected host:port".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Project id for tests and tools: `DSCACHE_PROJECT_ID`, or `"dscache"`.
pub fn default_project_id() -> String {
    default_project_id_from(|name| std::env::var(name).ok())
}

fn default_project_id_from<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("DSCACHE_PROJECT_ID")
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| "dscache".to_string())
}

fn parse_server_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
