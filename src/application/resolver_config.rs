//! Resolver Configuration
//!
//! Process-wide settings for the country resolver, fixed at startup.

use crate::domain::value_objects::RemoteServiceConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the country resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Hard upper bound on cached entries (default: 4096)
    pub capacity: usize,

    /// Fraction of capacity to trim down to once the bound is hit (default: 0.75)
    pub eviction_target: f64,

    /// Period of the maintenance loop (default: 1s)
    pub maintenance_interval: Duration,

    /// Inactivity after which a remote provider is closed (default: 30s)
    pub remote_idle_timeout: Duration,

    /// Local database file, used when no remote credentials are set
    pub database_path: Option<PathBuf>,

    /// Remote service account; takes precedence over the local database
    pub remote: Option<RemoteServiceConfig>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            eviction_target: 0.75,
            maintenance_interval: Duration::from_millis(1000),
            remote_idle_timeout: Duration::from_millis(30_000),
            database_path: None,
            remote: None,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the eviction target fraction.
    pub fn eviction_target(mut self, fraction: f64) -> Self {
        self.eviction_target = fraction;
        self
    }

    /// Set the maintenance interval.
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Set the remote idle timeout.
    pub fn remote_idle_timeout(mut self, timeout: Duration) -> Self {
        self.remote_idle_timeout = timeout;
        self
    }

    /// Set the local database path.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Set the remote service account.
    pub fn remote(mut self, remote: RemoteServiceConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Entry count the eviction pass trims down to.
    pub fn eviction_threshold(&self) -> usize {
        (self.capacity as f64 * self.eviction_target).floor() as usize
    }

    /// Remote credentials, if both halves are present.
    pub fn remote_credentials(&self) -> Option<&RemoteServiceConfig> {
        self.remote
            .as_ref()
            .filter(|r| !r.account_id.is_empty() && !r.license_key.is_empty())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !(self.eviction_target > 0.0 && self.eviction_target <= 1.0) {
            return Err(ConfigError::InvalidEvictionTarget(self.eviction_target));
        }
        if self.maintenance_interval.is_zero() {
            return Err(ConfigError::ZeroMaintenanceInterval);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("cache capacity must be greater than zero")]
    ZeroCapacity,
    #[error("eviction target must be in (0, 1], got {0}")]
    InvalidEvictionTarget(f64),
    #[error("maintenance interval must be greater than zero")]
    ZeroMaintenanceInterval,
}
